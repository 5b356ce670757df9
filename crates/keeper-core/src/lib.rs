//! Core library for `keeper`: a single-instance supervisor for an LLM
//! coding agent, plus the command policy gate the agent consults before it
//! runs shell commands.
//!
//! # Architecture
//!
//! ```text
//! keeper run
//!     |
//!     v
//! Supervisor --acquire--> LockManager (.agent.lock)
//!     |      --reclaim--> InstanceDescriptor (.agent.pid)
//!     |      --spawn----> agent child (stdin prompt, stdout/stderr pipes)
//!     |                        |
//!     |   <---- lines ---------+
//!     |   relay -> operator stdout + OutputLog (.agent-output.jsonl)
//!     v
//! Teardown (descriptor removed, lock released; exactly once)
//!
//! keeper gate
//!     stdin request --> PolicyGate --> stdout decision
//! ```

pub mod agent;
pub mod config;
pub mod lock;
pub mod policy;
pub mod process;
pub mod reclaim;
pub mod supervisor;
