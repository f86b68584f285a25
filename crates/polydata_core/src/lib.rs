pub mod error;
pub mod poly;
pub mod query;

pub use error::{PolyError, PolyResult};
pub use poly::{Poly, ID_KEY, TAGS_KEY};
pub use query::{PolyList, PolyQuery, DEFAULT_ITEM_PER_PAGE, MAX_ITEM_PER_PAGE};
