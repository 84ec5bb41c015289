pub mod visit;
pub mod visitor;

pub use visit::{NewVisit, VisitRecord};
pub use visitor::{GeoFields, LanguageFields, Visitor, VisitorAttributes, VisitorUpsert};
