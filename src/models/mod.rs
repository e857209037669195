pub mod account;
pub mod bundle;
pub mod change;
pub mod partition;
pub mod value;

pub use account::{Account, ACCOUNT_SCHEMA_VERSION};
pub use bundle::FieldBundle;
pub use change::{Change, ChangeStatus, CHANGE_SCHEMA_VERSION};
pub use partition::Partition;
pub use value::FieldValue;
