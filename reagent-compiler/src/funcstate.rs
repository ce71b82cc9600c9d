//! Per-function compile-time bookkeeping: lexical scopes, slot
//! allocation, upvalue registration and the chunk being built.
//!
//! A `Compiler` keeps a stack of these, one per function currently being
//! compiled (the outermost one standing in for the top-level program,
//! which this crate treats as a zero-param, non-capturing closure like
//! any other).

use arcstr::ArcStr;
use reagent_vm::closure::Chunk;
use reagent_vm::instr::Instr;
use sha2::{Digest, Sha256};

/// One active `loop`/`for` nest: `top` is where `next` restarts (the
/// loop's body entry for a bare `loop`, or the "fetch the next iterator
/// value" instruction for a `for`). `exit_jumps` collects `exit`'s
/// placeholder `Jump`s, patched to the loop's single shared exit point
/// once it's known; `cond_exits` collects `while`/`until`'s placeholder
/// `While`/`Until` test instructions, whose *second* field gets patched
/// to that same exit point by `Chunk::patch_exit_target`.
pub struct LoopCtx {
    pub top: usize,
    pub exit_jumps: Vec<usize>,
    pub cond_exits: Vec<usize>,
}

pub struct FuncState {
    pub name: Option<ArcStr>,
    pub chunk: Chunk,
    /// Lexical block scopes; each holds the `(name, slot)` pairs declared
    /// directly in that block. Index 0 holds parameters and upvalues,
    /// opened once and never popped.
    scopes: Vec<Vec<(ArcStr, u32)>>,
    /// Monotonically increasing; never reused even after a scope pops its
    /// slots back, so a stale reference to a slot that's since gone out
    /// of scope can't silently alias a later, unrelated local.
    next_slot: u32,
    high_water: u32,
    /// Names captured from an enclosing function, in registration order.
    /// `upvalues[i].1` is this function's own slot for the capture;
    /// `pending_captures[i]` is the *parent's* slot it was captured from,
    /// which the parent emits a `Local` for immediately before this
    /// function's `Closure` instruction.
    upvalues: Vec<(ArcStr, u32)>,
    pub pending_captures: Vec<u32>,
    /// `return` jumps to the end of the chunk, but the end isn't known
    /// until the whole body is compiled, so each `return` leaves a
    /// placeholder `Jump` here to patch once it is.
    pub return_patches: Vec<usize>,
    /// The nest of `loop`/`for` constructs currently being compiled, for
    /// `next`/`exit`/`while`/`until` to target. Never crosses a function
    /// boundary: a `fun`'s body starts with an empty stack of its own.
    loop_stack: Vec<LoopCtx>,
    /// Set only on a schema computed field's wrapper function, to the
    /// slot its `__self` parameter was declared in -- what `old` reads.
    self_slot: Option<u32>,
    hasher: Sha256,
}

impl FuncState {
    pub fn new(name: Option<ArcStr>, source: ArcStr) -> Self {
        FuncState {
            name,
            chunk: Chunk::new(source),
            scopes: vec![Vec::new()],
            next_slot: 0,
            high_water: 0,
            upvalues: Vec::new(),
            pending_captures: Vec::new(),
            return_patches: Vec::new(),
            loop_stack: Vec::new(),
            self_slot: None,
            hasher: Sha256::new(),
        }
    }

    pub fn push_loop(&mut self, top: usize) {
        self.loop_stack.push(LoopCtx { top, exit_jumps: Vec::new(), cond_exits: Vec::new() });
    }

    pub fn pop_loop(&mut self) -> LoopCtx {
        self.loop_stack.pop().expect("pop_loop without matching push_loop")
    }

    pub fn current_loop_top(&self) -> Option<usize> {
        self.loop_stack.last().map(|c| c.top)
    }

    pub fn add_loop_exit_jump(&mut self, idx: usize) -> Result<(), ()> {
        match self.loop_stack.last_mut() {
            Some(c) => {
                c.exit_jumps.push(idx);
                Ok(())
            }
            None => Err(()),
        }
    }

    pub fn add_loop_cond_exit(&mut self, idx: usize) -> Result<(), ()> {
        match self.loop_stack.last_mut() {
            Some(c) => {
                c.cond_exits.push(idx);
                Ok(())
            }
            None => Err(()),
        }
    }

    pub fn set_self_slot(&mut self, slot: u32) {
        self.self_slot = Some(slot);
    }

    pub fn current_self_slot(&self) -> Option<u32> {
        self.self_slot
    }

    pub fn declare_param(&mut self, name: ArcStr) -> u32 {
        let slot = self.alloc_slot();
        self.scopes[0].push((name, slot));
        slot
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    /// Pops the innermost scope, returning the number of slots it held
    /// (for the `Exit` that follows it in the emitted bytecode).
    pub fn pop_scope(&mut self) -> u32 {
        let scope = self.scopes.pop().expect("pop_scope without matching push_scope");
        let n = scope.len() as u32;
        self.next_slot -= n;
        n
    }

    pub fn declare_local(&mut self, name: ArcStr) -> u32 {
        let slot = self.alloc_slot();
        self.scopes.last_mut().expect("no open scope").push((name, slot));
        slot
    }

    pub fn resolve_local(&self, name: &str) -> Option<u32> {
        for scope in self.scopes.iter().rev() {
            if let Some((_, slot)) = scope.iter().rev().find(|(n, _)| n.as_str() == name) {
                return Some(*slot);
            }
        }
        None
    }

    pub fn resolve_upvalue(&self, name: &str) -> Option<u32> {
        self.upvalues.iter().find(|(n, _)| n.as_str() == name).map(|(_, slot)| *slot)
    }

    /// Registers `name` as a new upvalue captured from `parent_slot` in
    /// the enclosing function's frame, returning this function's own slot
    /// for it. Called only after `resolve_upvalue` has confirmed `name`
    /// isn't already captured.
    pub fn add_upvalue(&mut self, name: ArcStr, parent_slot: u32) -> u32 {
        let slot = self.alloc_slot();
        self.upvalues.push((name, slot));
        self.pending_captures.push(parent_slot);
        slot
    }

    /// Captured names in the same order as [`Self::upvalue_slots`] -- lets
    /// a caller that supplies its own synthetic enclosing scope (a REPL's
    /// console scope, say) match each upvalue back to the name it bound.
    pub fn upvalue_names(&self) -> Vec<ArcStr> {
        self.upvalues.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn upvalue_slots(&self) -> smallvec::SmallVec<[u32; 4]> {
        self.upvalues.iter().map(|(_, s)| *s).collect()
    }

    fn alloc_slot(&mut self) -> u32 {
        let slot = self.next_slot;
        self.next_slot += 1;
        if self.next_slot > self.high_water {
            self.high_water = self.next_slot;
        }
        slot
    }

    /// The largest number of simultaneously live slots this function
    /// ever needs, i.e. its `ClosureInfo::frame_size`.
    pub fn frame_size(&self) -> u32 {
        self.high_water
    }

    pub fn emit(&mut self, instr: Instr, line: u32) -> usize {
        self.hasher.update(format!("{instr:?}").as_bytes());
        self.chunk.push(instr, line)
    }

    pub fn set_instr(&mut self, idx: usize, instr: Instr) {
        self.chunk.instrs[idx] = instr;
    }

    pub fn len(&self) -> usize {
        self.chunk.len()
    }

    pub fn hash_feed(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub fn finish_hash(self) -> (Chunk, [u8; 32]) {
        let digest = self.hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest);
        (self.chunk, hash)
    }
}
