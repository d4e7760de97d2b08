/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */
mod blocker;
mod flag;
mod timeout;

pub(crate) use blocker::Blocker;
pub(crate) use flag::Flag;
pub(crate) use timeout::Timeout;
