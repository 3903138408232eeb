//! Offset and program catalog
//!
//! Plain data describing what to hook: the resolved offsets of functions in
//! one executable build, and which programs run at a function's entry and
//! return points.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::domain::ProgramId;

/// Resolved entry and return byte offsets of one function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuncOffsets {
    pub entry: u64,
    /// One offset per return instruction, in address order
    #[serde(default)]
    pub returns: Vec<u64>,
}

/// Offsets resolved for a specific executable, keyed by symbolic function name
///
/// A missing name means the executable does not contain that function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offsets {
    #[serde(default)]
    pub funcs: HashMap<String, FuncOffsets>,
}

impl Offsets {
    #[must_use]
    pub fn get(&self, function: &str) -> Option<&FuncOffsets> {
        self.funcs.get(function)
    }

    pub fn insert(&mut self, function: impl Into<String>, offsets: FuncOffsets) {
        self.funcs.insert(function.into(), offsets);
    }
}

/// Programs to run when a function is entered and when it returns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionPrograms {
    #[serde(default)]
    pub entry: Option<ProgramId>,
    #[serde(default, rename = "return")]
    pub ret: Option<ProgramId>,
    /// Attachment failure aborts the whole call instead of being skipped
    #[serde(default)]
    pub required: bool,
}

impl FunctionPrograms {
    pub fn entry(program: impl Into<ProgramId>) -> Self {
        Self { entry: Some(program.into()), ..Self::default() }
    }

    pub fn ret(program: impl Into<ProgramId>) -> Self {
        Self { ret: Some(program.into()), ..Self::default() }
    }

    pub fn both(entry: impl Into<ProgramId>, ret: impl Into<ProgramId>) -> Self {
        Self { entry: Some(entry.into()), ret: Some(ret.into()), required: false }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Neither an entry nor a return program is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entry.is_none() && self.ret.is_none()
    }
}

/// The unit of attachment for main-binary probes
#[derive(Debug, Clone, Copy)]
pub struct Probe<'a> {
    pub offsets: &'a FuncOffsets,
    pub programs: &'a FunctionPrograms,
}

/// Function (or kernel symbol) name to programs
pub type ProbeMap = BTreeMap<String, FunctionPrograms>;

/// Library name to its function probes
pub type LibraryProbes = BTreeMap<String, ProbeMap>;
