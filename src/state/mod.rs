pub mod site_state;

pub use site_state::{SiteState, StateChange};
