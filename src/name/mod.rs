//! The narrow boundary to name resolution: ports register themselves and resolve peers
//!  through [`NameResolver`], never touching the registry's storage. The distributed,
//!  SQL-backed service is an external collaborator; [`InProcessResolver`] covers tests
//!  and single-process deployments.

pub mod in_process;
pub mod resolver;

pub use in_process::InProcessResolver;
pub use resolver::NameResolver;
