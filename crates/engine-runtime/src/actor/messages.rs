/// Messages for the queue worker actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMsg {
    /// Run one unit of work and re-arm.
    Tick,
    Stop,
}
