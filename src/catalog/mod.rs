//! Static catalogs: field synonyms, SQL templates and intent seed phrases.

pub mod seeds;
pub mod synonyms;
pub mod templates;

pub use synonyms::{SynonymCatalog, Unresolved};
pub use templates::{SqlTemplate, TemplateCatalog};
