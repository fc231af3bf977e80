pub mod model;
pub mod paginate;
pub mod rulefile;

pub use model::{
    Case, Condition, ConditionItem, MockApi, ResponseSpec, ScriptCondition, ScriptResponse,
    SimpleCondition, SimpleResponse, ValidationError,
};
pub use paginate::Pagination;
