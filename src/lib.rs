//! Step-synchronized home energy player.
//!
//! Each player claims one home from a shared store, solves its dispatch for
//! the coming horizon, and moves in lockstep with the rest of the community
//! through "updated"/"forward" status exchanges with an aggregator.

pub mod actions;
pub mod channel;
pub mod cli;
pub mod config;
/// In-process aggregator for local community runs.
pub mod coordinator;
pub mod home;
pub mod io;
pub mod observation;
pub mod player;
pub mod policy;
pub mod runner;
pub mod scenario;
pub mod score;
/// Home dispatch solvers and their published results.
pub mod solver;
pub mod store;
