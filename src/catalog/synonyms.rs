//! Synonym Catalog
//!
//! Static alias tables for the enumerated fields. Every value that is bound
//! into SQL for these fields comes out of this catalog.

use crate::ups::schema::Field;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

/// (alias, canonical code). Aliases are matched case-insensitively.
const SERVICE_ALIASES: &[(&str, &str)] = &[
    ("ec2", "AmazonEC2"),
    ("amazon ec2", "AmazonEC2"),
    ("elastic compute cloud", "AmazonEC2"),
    ("ebs", "AmazonEC2"),
    ("rds", "AmazonRDS"),
    ("amazon rds", "AmazonRDS"),
    ("relational database service", "AmazonRDS"),
    ("aurora", "AmazonRDS"),
    ("s3", "AmazonS3"),
    ("amazon s3", "AmazonS3"),
    ("simple storage service", "AmazonS3"),
    ("cloudfront", "AmazonCloudFront"),
    ("cloud front", "AmazonCloudFront"),
    ("cdn", "AmazonCloudFront"),
    ("lambda", "AWSLambda"),
    ("aws lambda", "AWSLambda"),
    ("dynamodb", "AmazonDynamoDB"),
    ("dynamo", "AmazonDynamoDB"),
    ("eks", "AmazonEKS"),
    ("kubernetes", "AmazonEKS"),
    ("ecs", "AmazonECS"),
    ("fargate", "AmazonECS"),
    ("elasticache", "AmazonElastiCache"),
    ("redis", "AmazonElastiCache"),
    ("redshift", "AmazonRedshift"),
    ("sagemaker", "AmazonSageMaker"),
    ("cloudwatch", "AmazonCloudWatch"),
    ("vpc", "AmazonVPC"),
    ("nat gateway", "AmazonVPC"),
    ("kms", "awskms"),
    ("route 53", "AmazonRoute53"),
    ("route53", "AmazonRoute53"),
    ("athena", "AmazonAthena"),
    ("glue", "AWSGlue"),
    ("sns", "AmazonSNS"),
    ("sqs", "AWSQueueService"),
    ("kinesis", "AmazonKinesis"),
    ("opensearch", "AmazonES"),
    ("elasticsearch", "AmazonES"),
    ("efs", "AmazonEFS"),
    ("data transfer", "AWSDataTransfer"),
];

const REGION_ALIASES: &[(&str, &str)] = &[
    ("us-east-1", "us-east-1"),
    ("n. virginia", "us-east-1"),
    ("north virginia", "us-east-1"),
    ("virginia", "us-east-1"),
    ("us-east-2", "us-east-2"),
    ("ohio", "us-east-2"),
    ("us-west-1", "us-west-1"),
    ("california", "us-west-1"),
    ("us-west-2", "us-west-2"),
    ("oregon", "us-west-2"),
    ("ca-central-1", "ca-central-1"),
    ("canada", "ca-central-1"),
    ("eu-west-1", "eu-west-1"),
    ("ireland", "eu-west-1"),
    ("eu-west-2", "eu-west-2"),
    ("london", "eu-west-2"),
    ("eu-central-1", "eu-central-1"),
    ("frankfurt", "eu-central-1"),
    ("ap-south-1", "ap-south-1"),
    ("mumbai", "ap-south-1"),
    ("ap-northeast-1", "ap-northeast-1"),
    ("tokyo", "ap-northeast-1"),
    ("ap-southeast-1", "ap-southeast-1"),
    ("singapore", "ap-southeast-1"),
    ("ap-southeast-2", "ap-southeast-2"),
    ("sydney", "ap-southeast-2"),
    ("sa-east-1", "sa-east-1"),
    ("sao paulo", "sa-east-1"),
    ("global", "global"),
];

const PURCHASE_OPTION_ALIASES: &[(&str, &str)] = &[
    ("on-demand", "OnDemand"),
    ("on demand", "OnDemand"),
    ("ondemand", "OnDemand"),
    ("reserved", "Reserved"),
    ("reserved instance", "Reserved"),
    ("reserved instances", "Reserved"),
    ("ri", "Reserved"),
    ("savings plan", "SavingsPlan"),
    ("savings plans", "SavingsPlan"),
    ("savingsplan", "SavingsPlan"),
    ("spot", "Spot"),
    ("spot instances", "Spot"),
];

/// Friendly names used in response text.
const SERVICE_DISPLAY: &[(&str, &str)] = &[
    ("AmazonEC2", "EC2"),
    ("AmazonRDS", "RDS"),
    ("AmazonS3", "S3"),
    ("AmazonCloudFront", "CloudFront"),
    ("AWSLambda", "Lambda"),
    ("AmazonDynamoDB", "DynamoDB"),
    ("AmazonEKS", "EKS"),
    ("AmazonECS", "ECS"),
    ("AmazonElastiCache", "ElastiCache"),
    ("AmazonRedshift", "Redshift"),
    ("AmazonSageMaker", "SageMaker"),
    ("AmazonCloudWatch", "CloudWatch"),
    ("AmazonVPC", "VPC"),
    ("awskms", "KMS"),
    ("AmazonRoute53", "Route 53"),
    ("AmazonAthena", "Athena"),
    ("AWSGlue", "Glue"),
    ("AmazonSNS", "SNS"),
    ("AWSQueueService", "SQS"),
    ("AmazonKinesis", "Kinesis"),
    ("AmazonES", "OpenSearch"),
    ("AmazonEFS", "EFS"),
    ("AWSDataTransfer", "Data Transfer"),
];

fn aliases_for(field: Field) -> &'static [(&'static str, &'static str)] {
    match field {
        Field::Service => SERVICE_ALIASES,
        Field::Region => REGION_ALIASES,
        Field::PurchaseOption => PURCHASE_OPTION_ALIASES,
        Field::Account => &[],
    }
}

fn build_lookup(aliases: &[(&'static str, &'static str)]) -> HashMap<String, &'static str> {
    let mut map = HashMap::new();
    for (alias, canonical) in aliases {
        map.insert(alias.to_lowercase(), *canonical);
        map.insert(canonical.to_lowercase(), *canonical);
    }
    map
}

/// Alternation over every alias, longest first, on word boundaries.
fn build_mention_regex(aliases: &[(&'static str, &'static str)]) -> Regex {
    let mut names: Vec<&str> = aliases.iter().map(|(alias, _)| *alias).collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    names.dedup();
    let alternation = names
        .iter()
        .map(|name| regex::escape(name))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)(?:^|[^a-z0-9-])({})(?:$|[^a-z0-9-])", alternation))
        .expect("alias alternation is built from escaped literals")
}

lazy_static! {
    static ref SERVICE_LOOKUP: HashMap<String, &'static str> = build_lookup(SERVICE_ALIASES);
    static ref REGION_LOOKUP: HashMap<String, &'static str> = build_lookup(REGION_ALIASES);
    static ref PURCHASE_LOOKUP: HashMap<String, &'static str> = build_lookup(PURCHASE_OPTION_ALIASES);
    static ref SERVICE_MENTIONS: Regex = build_mention_regex(SERVICE_ALIASES);
    static ref REGION_MENTIONS: Regex = build_mention_regex(REGION_ALIASES);
    static ref PURCHASE_MENTIONS: Regex = build_mention_regex(PURCHASE_OPTION_ALIASES);
}

/// Alias that could not be mapped to a canonical code.
#[derive(Debug, Clone, PartialEq)]
pub struct Unresolved {
    pub field: Field,
    pub value: String,
    pub suggestions: Vec<String>,
}

impl Unresolved {
    pub fn message(&self) -> String {
        let mut message = format!("I don't recognise the {} '{}'", self.field.as_str().replace('_', " "), self.value);
        if !self.suggestions.is_empty() {
            message.push_str(&format!(". Did you mean {}?", self.suggestions.join(" or ")));
        }
        message
    }
}

pub struct SynonymCatalog;

impl SynonymCatalog {
    const SUGGESTION_THRESHOLD: f64 = 0.85;
    const MAX_SUGGESTIONS: usize = 3;

    fn lookup(field: Field) -> Option<&'static HashMap<String, &'static str>> {
        match field {
            Field::Service => Some(&SERVICE_LOOKUP),
            Field::Region => Some(&REGION_LOOKUP),
            Field::PurchaseOption => Some(&PURCHASE_LOOKUP),
            Field::Account => None,
        }
    }

    /// Map an alias to its canonical code.
    pub fn normalize(field: Field, raw: &str) -> std::result::Result<&'static str, Unresolved> {
        let key = raw.trim().to_lowercase();
        let found = Self::lookup(field).and_then(|map| map.get(&key).copied());
        found.ok_or_else(|| Unresolved {
            field,
            value: raw.trim().to_string(),
            suggestions: Self::suggest(field, &key),
        })
    }

    /// Closest aliases by Jaro-Winkler similarity.
    pub fn suggest(field: Field, raw: &str) -> Vec<String> {
        let needle = raw.trim().to_lowercase();
        let mut scored: Vec<(f64, &str)> = aliases_for(field)
            .iter()
            .map(|(alias, _)| (strsim::jaro_winkler(&needle, alias), *alias))
            .filter(|(score, _)| *score >= Self::SUGGESTION_THRESHOLD)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.cmp(b.1)));
        let mut suggestions: Vec<String> = Vec::new();
        for (_, alias) in scored {
            let display = display_alias(field, alias);
            if !suggestions.contains(&display) {
                suggestions.push(display);
            }
            if suggestions.len() == Self::MAX_SUGGESTIONS {
                break;
            }
        }
        suggestions
    }

    /// Canonical codes mentioned in free text, in order of first mention.
    pub fn mentions(field: Field, text: &str) -> Vec<&'static str> {
        let regex: &Regex = match field {
            Field::Service => &SERVICE_MENTIONS,
            Field::Region => &REGION_MENTIONS,
            Field::PurchaseOption => &PURCHASE_MENTIONS,
            Field::Account => return Vec::new(),
        };
        let mut found = Vec::new();
        // Matches consume the surrounding separator, so scan from each match start + 1.
        let mut offset = 0;
        while offset < text.len() {
            let Some(caps) = regex.captures_at(text, offset) else { break };
            let Some(m) = caps.get(1) else { break };
            if let Ok(canonical) = Self::normalize(field, m.as_str()) {
                if !found.contains(&canonical) {
                    found.push(canonical);
                }
            }
            offset = m.end();
        }
        found
    }

    pub fn display_name(field: Field, canonical: &str) -> String {
        match field {
            Field::Service => SERVICE_DISPLAY
                .iter()
                .find(|(code, _)| *code == canonical)
                .map(|(_, name)| name.to_string())
                .unwrap_or_else(|| canonical.to_string()),
            _ => canonical.to_string(),
        }
    }
}

fn display_alias(field: Field, alias: &str) -> String {
    match SynonymCatalog::normalize(field, alias) {
        Ok(canonical) => SynonymCatalog::display_name(field, canonical),
        Err(_) => alias.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_aliases_and_codes() {
        assert_eq!(SynonymCatalog::normalize(Field::Service, "CloudFront").unwrap(), "AmazonCloudFront");
        assert_eq!(SynonymCatalog::normalize(Field::Service, " amazonec2 ").unwrap(), "AmazonEC2");
        assert_eq!(SynonymCatalog::normalize(Field::Region, "Frankfurt").unwrap(), "eu-central-1");
        assert_eq!(SynonymCatalog::normalize(Field::PurchaseOption, "on demand").unwrap(), "OnDemand");
    }

    #[test]
    fn test_unresolved_suggests_close_alias() {
        let err = SynonymCatalog::normalize(Field::Service, "cloudfrnt").unwrap_err();
        assert_eq!(err.field, Field::Service);
        assert!(err.suggestions.contains(&"CloudFront".to_string()));
        assert!(err.message().contains("Did you mean"));
    }

    #[test]
    fn test_mentions_respect_word_boundaries() {
        let found = SynonymCatalog::mentions(Field::Service, "EC2 and RDS costs, excluding cloudfront");
        assert_eq!(found, vec!["AmazonEC2", "AmazonRDS", "AmazonCloudFront"]);
        assert!(SynonymCatalog::mentions(Field::Service, "describe the rdsx table").is_empty());
    }

    #[test]
    fn test_account_field_is_not_enumerated() {
        assert!(SynonymCatalog::normalize(Field::Account, "111111111111").is_err());
    }
}
