pub mod actor;
pub mod messages;
pub mod spawn;
pub mod worker;

pub use actor::{Actor, ActorContext, ActorRef};
pub use spawn::spawn_actor;
