//! Zero-copy scatter/gather packet buffer management.
//!
//! A [`Paddr`](pvbm_sys::Paddr) is a handle into one of several pools: fixed
//! headers ("pbufs"), the tree nodes that chain them together into a packet
//! ("pvbufs"), or externally owned memory. This crate owns the allocators
//! for the first two and a callback bridge for the third, plus the
//! operations (`prepend`, `append`, `clone`, `segment`, ...) that mutate a
//! pvbuf tree and the lookup-table engine used to classify packets once
//! they're assembled.

pub mod diag;
pub mod error;
pub mod external;
pub mod init;
pub mod lookup;
pub mod manager;
pub mod obj_alloc;
pub mod ops;
pub mod pbuf_alloc;
pub mod pvbuf;
pub mod pvbuf_alloc;
pub mod traverse;

pub use error::{Error, Result};
pub use manager::{BufferManager, BufferManagerConfig};
pub use pvbm_sys::{Iovec, Paddr, PaddrTag, ShortRegion};
