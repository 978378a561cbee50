//! Seed phrases per intent. The embedding router builds one centroid per
//! intent from these at startup.

use crate::ups::schema::IntentType;

pub fn seed_phrases(intent: IntentType) -> &'static [&'static str] {
    match intent {
        IntentType::CostBreakdown => &[
            "break down my costs by service",
            "cost breakdown by region last month",
            "split spend by account",
            "show costs per purchase option",
            "what did each service cost",
            "spend by usage type",
        ],
        IntentType::TopNRanking => &[
            "top 5 services last month",
            "which services cost the most",
            "highest spending regions",
            "biggest cost drivers",
            "rank accounts by spend",
            "top 10 most expensive services",
        ],
        IntentType::AnomalyAnalysis => &[
            "why did costs spike yesterday",
            "unusual spend in the last 30 days",
            "any cost anomalies this month",
            "sudden jump in ec2 spend",
            "unexpected increase in my bill",
            "detect abnormal daily costs",
        ],
        IntentType::CostTrend => &[
            "cost trend over the last 6 months",
            "how has spend changed over time",
            "monthly cost history",
            "is my spend growing",
            "show the trend of rds costs",
            "month over month spending",
        ],
        IntentType::Utilization => &[
            "reserved instance utilization",
            "savings plan utilization last month",
            "how much of my commitment is used",
            "are my reservations underused",
            "ri coverage and usage",
            "unused savings plan commitment",
        ],
        IntentType::Optimization => &[
            "how can i reduce my costs",
            "where can i save money",
            "savings opportunities for ec2",
            "rightsizing recommendations",
            "on demand spend that could be reserved",
            "optimize my cloud bill",
        ],
        IntentType::Governance => &[
            "untagged resources cost",
            "spend without a cost center tag",
            "tagging compliance by account",
            "which costs are missing tags",
            "cost allocation coverage",
            "unallocated spend",
        ],
        IntentType::DataMetadata => &[
            "how fresh is the cost data",
            "when was the billing data last updated",
            "what date range does the data cover",
            "how many services are in the dataset",
            "latest available usage date",
            "data coverage summary",
        ],
        IntentType::Comparative => &[
            "compare this month to last month",
            "last month versus the month before",
            "how does ec2 compare to rds",
            "difference in spend between quarters",
            "compare costs year over year",
            "period over period comparison",
        ],
        IntentType::GeneralInquiry => &[
            "what can you do",
            "help",
            "how does billing work",
            "explain savings plans",
            "hello",
            "what is unblended cost",
        ],
    }
}
