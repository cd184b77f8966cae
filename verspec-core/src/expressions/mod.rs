mod template;
mod value;

pub use template::{parse_template, Segment, Template, TemplateError};
pub use value::{CompareOp, Expr, ValueExpr};
