pub mod batch;
pub mod export;

pub use batch::BatchInput;
pub use export::ReportWriter;
