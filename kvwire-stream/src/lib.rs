//! Sliding windows over streamed response bodies.
//!
//! Large streamed results (query rows, analytics rows) are tokenized as
//! they arrive. A [`StreamWindow`] keeps only the part of the stream the
//! tokenizer may still need, addressed by absolute stream offsets, and
//! [`RowScanner`] uses one to cut complete rows out of a JSON array.

pub mod composite;
pub mod copying;
pub mod error;
pub mod scanner;
pub mod window;

pub use composite::CompositeStreamWindow;
pub use copying::CopyingStreamWindow;
pub use error::WindowError;
pub use scanner::RowScanner;
pub use window::StreamWindow;
