//! Script runner and interactive console for the reagent engine.
//!
//! Wires a [`reagent_store::Store`] in as the compiler's relational
//! backend and a [`reagent_rt::EventLoop`] as its scheduler, then either
//! runs a file to completion or drops into a line-at-a-time console.

mod console;
mod prompt;
mod script;

use clap::Parser;
use reagent_rt::EventLoop;
use reagent_store::Store;
use reagent_vm::Globals;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::mpsc;
use std::time::Duration;

use console::Console;
use prompt::ConsolePrompt;

#[derive(Parser)]
#[command(version, about)]
struct Params {
    /// script to run; omit to start an interactive console
    script: Option<PathBuf>,
    /// enable logging at the given level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(params: &Params) {
    let mut builder = env_logger::Builder::new();
    match &params.log_level {
        Some(level) => {
            builder.parse_filters(level);
        }
        None => {
            builder.parse_default_env();
        }
    }
    builder.init();
}

fn build_globals(event_loop: &Rc<RefCell<EventLoop>>) -> Globals {
    let mut globals = Globals::new();
    let store: Rc<RefCell<Store>> = Rc::new(RefCell::new(Store::new()));
    globals.set_store_hooks(store);
    globals.set_action_sink(event_loop.clone());
    globals.install_builtin_methods();
    reagent_rt::install(&mut globals, event_loop.clone());
    globals
}

fn main() {
    let params = Params::parse();
    init_logging(&params);

    let event_loop = Rc::new(RefCell::new(EventLoop::new()));
    let mut globals = build_globals(&event_loop);

    let code = match &params.script {
        Some(path) => script::run(path, &mut globals, &event_loop),
        None => run_console(&mut globals, &event_loop),
    };
    std::process::exit(code);
}

/// A background thread owns the blocking line editor so the main thread
/// can keep polling the event loop between lines; only completed lines
/// (plain, `Send`-safe `String`s) ever cross the thread boundary, since
/// `Value` itself is `Rc`-based and can't.
enum Line {
    Text(String),
    Eof,
}

fn spawn_reader() -> mpsc::Receiver<Line> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut editor = reedline::Reedline::create();
        let prompt = ConsolePrompt;
        loop {
            match editor.read_line(&prompt) {
                Ok(reedline::Signal::Success(line)) => {
                    if tx.send(Line::Text(line)).is_err() {
                        break;
                    }
                }
                Ok(reedline::Signal::CtrlC) | Ok(reedline::Signal::CtrlD) => {
                    let _ = tx.send(Line::Eof);
                    break;
                }
                Err(e) => {
                    log::error!("console input failed: {e}");
                    let _ = tx.send(Line::Eof);
                    break;
                }
            }
        }
    });
    rx
}

fn run_console(globals: &mut Globals, event_loop: &Rc<RefCell<EventLoop>>) -> i32 {
    let rx = spawn_reader();
    let mut console = Console::new();

    loop {
        match rx.try_recv() {
            Ok(Line::Text(text)) => {
                match console.eval(&text, globals) {
                    Ok(Some(value)) => println!("{}", reagent_value::display_value(&value)),
                    Ok(None) => {}
                    Err(e) => eprintln!("{e}"),
                }
                continue;
            }
            Ok(Line::Eof) => break,
            Err(mpsc::TryRecvError::Disconnected) => break,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        match event_loop.borrow().poll(globals) {
            Some(wait) => std::thread::sleep(wait.min(Duration::from_millis(50))),
            None => std::thread::sleep(Duration::from_millis(50)),
        }
    }
    0
}
