//! Compiled code containers: [`Chunk`] (one compiled program or nested
//! function body), [`ClosureInfo`] (the static description the compiler
//! attaches to a `closure` instruction) and [`Closure`] (the runtime
//! value: a `ClosureInfo` plus the upvalues it closed over).

use crate::instr::Instr;
use arcstr::ArcStr;
use reagent_value::Reference;
use smallvec::SmallVec;
use std::rc::Rc;

/// A flat instruction sequence with a parallel line table for traces.
/// Top-level scripts and every nested function body share this same
/// representation, but each compiles into its own `Chunk` (`entry` is
/// always `0` in this implementation) rather than sharing one chunk
/// addressed by offset: falling off the end of a chunk is how a call
/// returns implicitly (`run` stops once `ip >= chunk.len()`), so a
/// nested function's body can't share its enclosing scope's chunk
/// without that return accidentally running into whatever instructions
/// happen to follow. `entry` stays part of the type for the case a
/// future version wants to pack multiple entry points into one chunk.
#[derive(Debug)]
pub struct Chunk {
    pub source: ArcStr,
    pub instrs: Vec<Instr>,
    pub lines: Vec<u32>,
}

impl Chunk {
    pub fn new(source: impl Into<ArcStr>) -> Self {
        Chunk { source: source.into(), instrs: Vec::new(), lines: Vec::new() }
    }

    pub fn push(&mut self, instr: Instr, line: u32) -> usize {
        let idx = self.instrs.len();
        self.instrs.push(instr);
        self.lines.push(line);
        idx
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn patch_jump_target(&mut self, at: usize, target: usize) {
        match &mut self.instrs[at] {
            Instr::Jump(t) => *t = target,
            Instr::If(t, _) | Instr::Until(t, _) | Instr::While(t, _) => *t = target,
            Instr::And(t) | Instr::Or(t) | Instr::Exists(t) | Instr::Try(t) => *t = target,
            other => panic!("patch_jump_target on non-jump instruction {other:?}"),
        }
    }

    /// Patches a `While`/`Until` test's *second* field: the exit branch
    /// taken once the loop's condition stops holding.
    pub fn patch_exit_target(&mut self, at: usize, target: usize) {
        match &mut self.instrs[at] {
            Instr::While(_, f) | Instr::Until(_, f) => *f = target,
            other => panic!("patch_exit_target on non-loop-test instruction {other:?}"),
        }
    }
}

/// Static description of a compiled function, attached to a `closure`
/// instruction. `nparams` is negative when the function is variadic; its
/// absolute value is the number of required leading parameters.
///
/// `upvalue_slots[i]` is the local slot that holds the i-th captured
/// reference once the frame is set up. Upvalues are discovered lazily as
/// the compiler walks a function's body (an upvalue is just a name that
/// resolves to an enclosing frame's slot instead of this one), so they
/// don't get a tidy contiguous range the way parameters do; recording
/// each one's slot explicitly instead of assuming contiguity lets slot
/// allocation stay a single monotonically increasing counter shared by
/// parameters, upvalues and ordinary locals alike.
#[derive(Debug)]
pub struct ClosureInfo {
    pub chunk: Rc<Chunk>,
    pub entry: usize,
    pub frame_size: u32,
    pub nparams: i32,
    pub upvalue_slots: SmallVec<[u32; 4]>,
    pub hash: [u8; 32],
    pub name: Option<ArcStr>,
}

impl ClosureInfo {
    pub fn is_variadic(&self) -> bool {
        self.nparams < 0
    }

    pub fn min_params(&self) -> u32 {
        self.nparams.unsigned_abs()
    }

    pub fn nupvalues(&self) -> u32 {
        self.upvalue_slots.len() as u32
    }
}

/// The runtime value behind `Value::Closure`: a `ClosureInfo` plus the
/// references it captured at creation time.
#[derive(Debug)]
pub struct Closure {
    pub info: Rc<ClosureInfo>,
    pub upvalues: Vec<Reference>,
}
