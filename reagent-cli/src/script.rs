//! Runs a whole file top to bottom, then drains the event loop until
//! nothing is left scheduled.

use reagent_vm::Globals;
use std::cell::RefCell;
use std::rc::Rc;

use crate::EventLoop;

/// Returns the process exit code: `0` on a clean run, `1` if the script
/// failed to parse, compile or raised an uncaught error at the top level.
pub fn run(path: &std::path::Path, globals: &mut Globals, event_loop: &Rc<RefCell<EventLoop>>) -> i32 {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("reagent: can't read {}: {e}", path.display());
            return 1;
        }
    };
    let source = arcstr::ArcStr::from(path.to_string_lossy().into_owned());

    let node = match reagent_syntax::parse_program(source.clone(), &text) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("{}", e.into_payload(source));
            return 1;
        }
    };
    let info = match reagent_compiler::compile_program(source, &node) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };
    if let Err(e) = reagent_vm::run_closure(&info, &[], &[], globals) {
        eprintln!("{e}");
        return 1;
    }

    event_loop.borrow().run_until_idle(globals);
    0
}
