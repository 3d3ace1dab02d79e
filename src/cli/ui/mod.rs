pub mod output;

pub use output::{Output, styled_state, styled_status};
