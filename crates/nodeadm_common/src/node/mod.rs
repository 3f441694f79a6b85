pub mod validation;

pub use validation::{run_preflight, FakeNodeValidator, KubectlValidator, NodeValidator};
