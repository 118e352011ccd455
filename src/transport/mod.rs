//! Async transport - packet streams over sockets, pipes or any tokio I/O.
//!
//! ```text
//! WriterHandle ─► writer task ─► AsyncWrite ══ connection ══ AsyncRead ─► reader task ─► Receiver<Packet>
//! ```
//!
//! - [`spawn_writer_task`] - batched, optionally collated sending with
//!   backpressure
//! - [`spawn_reader_task`] - resynchronising receive with collated packets
//!   expanded in place

mod reader;
mod writer;

pub use reader::{spawn_reader_task, ReadStats};
pub use writer::{spawn_writer_task, spawn_writer_task_default, WriterHandle};
