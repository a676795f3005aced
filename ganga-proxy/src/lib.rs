//! User-facing surface over the Ganga object model.
//!
//! - [`Proxy`]: one guarded handle per object; hides hidden attributes,
//!   refuses writes to protected ones, re-wraps components on read
//! - [`GpiValue`]: attribute values with objects always wrapped
//! - [`GpiClass`]: constructor for a registered plugin class, with copy
//!   construction and keyword assignment
//!
//! ```ignore
//! let job = GpiClass::new(&plugins, "jobs", "Job")?.create()?;
//! job.set("backend", "Local")?;
//! println!("{job}");
//! ```

mod class;
mod error;
mod proxy;
mod value;

pub use class::GpiClass;
pub use error::{ProxyError, ProxyResult};
pub use proxy::Proxy;
pub use value::GpiValue;
