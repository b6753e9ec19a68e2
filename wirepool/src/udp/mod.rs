//! The UDP request pipeline (spec.md §2/§4.2-§4.4): listener pool →
//! classifier → bounded per-group queue → dynamically sized worker pool.

pub mod group;
pub mod listener;
pub mod packet;
pub mod queue;
pub mod server;
pub mod worker;

pub use group::UdpGroup;
pub use packet::UdpPacket;
pub use queue::UdpRequestQueue;
pub use server::UdpServer;
pub use worker::{UdpWorkerHandle, UdpWorkerPool};
