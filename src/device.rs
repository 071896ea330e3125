//! `device` binds a memory backend and an engine together.
//!
//! Tensors, contexts and backpropagation are written once against the
//! `Device` trait and pick their numeric back end through it. Only the host
//! device ships with the crate.

use crate::engine::{ComputeBackend, CpuEngine};
use crate::memory::{HostMemory, MemoryBackend};
use std::fmt::Debug;

pub trait Device: Debug + 'static {
    type Memory: MemoryBackend;
    type Engine: ComputeBackend<Memory = Self::Memory>;
}

/// Host device: pooled `Vec` buffers and rayon/BLAS kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cpu;

impl Device for Cpu {
    type Memory = HostMemory;
    type Engine = CpuEngine;
}
