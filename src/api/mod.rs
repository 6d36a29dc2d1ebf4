pub mod datafordeler;
pub mod paging;
pub mod plandata;
pub mod transport;

pub use datafordeler::{BuildingClient, BuildingQuery};
pub use paging::{Harvest, Page, PageSource, Pages, PagingPolicy};
pub use plandata::PlanClient;
pub use transport::{HttpTransport, RawResponse, Transport};
