mod job;
mod scheduler;

pub use job::Job;
pub use scheduler::Scheduler;
