//! # class-rebuild
//!
//! Incremental recompilation of a Java source tree driven by binary interface
//! (ABI) compatibility instead of timestamps.
//!
//! ## Architecture
//!
//! - **abi**: Structural interface of a compiled class and ABI snapshots
//! - **descriptor**: JVM field and method descriptor parsing
//! - **classfile**: Class-file parser producing the ABI model
//! - **reader**: Class-file enumeration and parallel snapshot capture
//! - **graph**: Forward and reverse class dependency graph
//! - **compat**: Binary compatibility rules between two versions of a class
//! - **scan**: Source and class file discovery
//! - **tracker**: Transactional source change detection
//! - **classmap**: Source file to class registry
//! - **store**: Persistent build state using LMDB
//! - **compiler**: Compiler contract and per-source results
//! - **javac**: `javac` process integration
//! - **orchestrator**: Cold, incremental and no-op builds
//! - **config**: Path and tool resolution for the command line

pub mod abi;
pub mod classfile;
pub mod classmap;
pub mod cli;
pub mod compat;
pub mod compiler;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod graph;
pub mod javac;
pub mod orchestrator;
pub mod reader;
pub mod scan;
pub mod store;
pub mod tracker;

#[cfg(test)]
mod fixture;
