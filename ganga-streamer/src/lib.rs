//! Versioned XML record format for Ganga object trees.
//!
//! - [`VStreamer`] / [`to_string`]: render one object tree as a `<root>` record
//! - [`Loader`] / [`from_str`]: rebuild a tree, containing unknown classes and
//!   incompatible schema versions to placeholder objects
//! - [`to_literal`] / [`parse_literal`]: the scalar grammar used in `<value>`
//! - [`TreePrinter`]: indented text rendering for display
//!
//! A record looks like:
//!
//! ```text
//! <root>
//!  <class name="Job" version="1.2" category="jobs">
//!   <attribute name="name"><value>'analysis'</value></attribute>
//!   <attribute name="application">
//!    <class name="Executable" version="1.0" category="applications">
//!     <attribute name="exe"><value>'echo'</value></attribute>
//!    </class>
//!   </attribute>
//!  </class>
//! </root>
//! ```

mod error;
mod literal;
mod loader;
mod printer;
mod writer;

pub use error::{StreamError, StreamResult};
pub use literal::{parse_literal, to_literal};
pub use loader::{from_reader, from_str, Loaded, Loader};
pub use printer::TreePrinter;
pub use writer::{to_string, to_writer, VStreamer};
