//! The bytecode instruction set.
//!
//! Instructions live in a flat `Vec<Instr>` addressed by index rather than
//! an owning tree of nodes -- jump targets are plain `usize`s into that
//! vector, the "instruction graph with deferred-edge builder" the design
//! notes call for in place of pointer patching.

use crate::closure::ClosureInfo;
use arcstr::ArcStr;
use reagent_value::Value;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub enum Instr {
    /// Push a literal value.
    Push(Value),
    Pop,
    /// Pop two values, keep neither (used to discard a statement result
    /// together with the reference it came from).
    Pop2,
    /// Open `n` fresh local slots at the top of the frame.
    Enter(u32),
    /// Close the `n` most recently opened local slots.
    Exit(u32),
    /// Push the reference bound to local slot `n`.
    Local(u32),
    /// Declare local slot `n`, initialized by popping the top of stack
    /// into a fresh cell.
    Var(u32),
    /// Bind the top of stack to a global name.
    Def(ArcStr),
    /// Pop a callable and `argc` arguments, call it, push the result.
    Call(u32),
    /// Call a named global directly without a preceding `Local`/lookup.
    ConstCall(ArcStr, u32),
    /// Pop a value then a reference, write the value into the reference.
    Assign,
    /// Unconditional jump.
    Jump(usize),
    /// Pop a condition, jump to `.0` if truthy else `.1`.
    If(usize, usize),
    /// Peek the top of stack; if falsy, short-circuit to target without
    /// evaluating the right operand (left stays on the stack as the
    /// result), else pop and continue.
    And(usize),
    /// Peek the top of stack; if truthy, short-circuit to target, else
    /// pop and continue.
    Or(usize),
    /// Loop test: pop a condition, continue to `.0` (body) while truthy,
    /// else exit to `.1`. Used for `while`.
    While(usize, usize),
    /// Loop test: same shape as `While` but with the sense of the
    /// condition inverted, used for `until` (loop until it's truthy).
    Until(usize, usize),
    /// Pop the value a preceding `Next` produced; if it is `nil` (meaning
    /// `Next` found nothing left), pop the iterator underneath it too and
    /// jump to the target, else push the value back and fall through to
    /// the loop body. `Next` always runs immediately before this, so the
    /// value this pops is always the one `Next` just produced.
    Exists(usize),
    /// Advance the iterator on top of stack, pushing the next value or
    /// `Nil` if exhausted. `nil` is therefore indistinguishable from "an
    /// iterated collection that contains a literal `nil` element" -- a
    /// known limitation of using the value type itself as the
    /// end-of-iteration sentinel rather than a side channel.
    Next,
    /// Push the key half of the pair the last `Next` produced (tree
    /// iteration yields `(key, value)`; `key` recovers the first half).
    Key,
    /// Instantiate a closure from a `ClosureInfo`, capturing `nupvalues`
    /// references from the enclosing frame (already pushed by the
    /// compiler as a run of `Local`s immediately before this).
    Closure(Rc<ClosureInfo>),
    /// Push a try target; errors raised anywhere before the matching
    /// `Catch` unwind the call stack to it instead of escaping the frame.
    Try(usize),
    /// Pop the innermost try target. Emitted twice per `try`/`catch`: once
    /// right after the protected body finishes without raising (retiring
    /// the target), and once as the first instruction at the catch target
    /// itself (where an error, if that's why control landed here, is
    /// already sitting on the stack for the handler to bind).
    Catch,
    /// Pop `n` values and push a `List` built from them, in order.
    List(u32),
    /// Multi-dispatch `stringbuffer` append: pop a value and a buffer
    /// reference, call the value's `append` method against the buffer.
    Append,
    /// Build the field-name/value pairs for a relational `schema`/
    /// `insert`/`update` form from `n` pairs on the stack.
    RaFields(u32),
}
