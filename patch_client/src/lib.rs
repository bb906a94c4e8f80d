pub use error::{PatchClientError, Result};
pub use interface::{PatchSource, RangePart};
pub use patch_client::PatchClient;
pub use range::{ByteRange, ContentRange, format_range_header, range_header_len, total_len};

mod body_reader;
mod error;
mod interface;
mod multipart;
mod patch_client;
mod range;
mod retry;
