/// Abacus CLI.
/// Parses the flag surface, loads rc files, then runs files, command
/// line expressions, and/or an interactive line loop.

use abacus::runtime::{AbortLevel, Runtime};
use abacus::Config;
use clap::Parser as ClapParser;
use miette::miette;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::exit;

// 64 MB stack for the worker thread: deep recursion in user scripts
// recurses the interpreter too.
const STACK_SIZE: usize = 64 * 1024 * 1024;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(ClapParser)]
#[command(
    name = "abacus",
    disable_help_flag = true,
    disable_version_flag = true,
    about = "An arbitrary-precision calculator language"
)]
struct Cli {
    /// Allow custom (plugin) builtins
    #[arg(short = 'C')]
    custom: bool,

    /// Ignore environment variables
    #[arg(short = 'e')]
    ignore_env: bool,

    /// Print help and exit
    #[arg(short = 'h')]
    help: bool,

    /// Go interactive after -f / command processing
    #[arg(short = 'i')]
    interactive: bool,

    /// Permission mask: bit 4 = read files, 2 = write files, 1 = exec
    #[arg(short = 'm', value_name = "MODE")]
    mode: Option<u8>,

    /// Reserved
    #[arg(short = 'n')]
    reserved: bool,

    /// Use legacy-default configuration (classic mode)
    #[arg(short = 'O')]
    classic: bool,

    /// Pipe mode: no prompts, process stdin then exit
    #[arg(short = 'p')]
    pipe: bool,

    /// Do not run startup rc files
    #[arg(short = 'q')]
    no_rc: bool,

    /// Unbuffered stdin/stdout
    #[arg(short = 'u')]
    unbuffered: bool,

    /// Continue on error (within bounds)
    #[arg(short = 'c')]
    keep_going: bool,

    /// Silence the startup banner; resource_debug=0, tilde_ok=0
    #[arg(short = 'd')]
    quiet: bool,

    /// Print version and exit
    #[arg(short = 'v')]
    version: bool,

    /// Debug levels as calc:resource:user
    #[arg(short = 'D', value_name = "LEVELS")]
    debug: Option<String>,

    /// Execute FILE (implies -s for the remaining operands)
    #[arg(short = 'f', value_name = "FILE")]
    file: Option<PathBuf>,

    /// Treat remaining operands as strings for argv()
    #[arg(short = 's')]
    strings: bool,

    /// Expressions to evaluate, or argv() strings under -s / -f
    #[arg(trailing_var_arg = true)]
    operands: Vec<String>,
}

fn main() {
    // clap itself exits 2 on malformed options
    let cli = Cli::parse();
    let worker = std::thread::Builder::new()
        .stack_size(STACK_SIZE)
        .spawn(move || run(cli))
        .expect("spawn worker");
    exit(worker.join().expect("worker panicked"));
}

fn run(cli: Cli) -> i32 {
    if cli.help {
        print_help();
        return 0;
    }
    if cli.version {
        println!("abacus {}", VERSION);
        return 0;
    }

    let mut rt = Runtime::new();
    if cli.classic {
        rt.conf = Config::classic();
    }
    if let Some(mode) = cli.mode {
        if mode > 7 {
            eprintln!("abacus: -m mode must be 0..7");
            return 4;
        }
        rt.perm = mode;
    }
    rt.continue_on_error = cli.keep_going;
    if cli.quiet {
        rt.conf.resource_debug = 0;
        rt.conf.tilde_ok = false;
    }
    if let Some(levels) = &cli.debug {
        let mut parts = levels.split(':');
        let parse = |s: Option<&str>| s.and_then(|s| s.parse::<i64>().ok());
        match (
            parse(parts.next()),
            parse(parts.next()),
            parse(parts.next()),
        ) {
            (Some(c), r, u) => {
                rt.conf.calc_debug = c;
                rt.conf.resource_debug = r.unwrap_or(rt.conf.resource_debug);
                rt.conf.user_debug = u.unwrap_or(rt.conf.user_debug);
            }
            _ => {
                eprintln!("abacus: -D expects calc[:resource[:user]] debug levels");
                return 5;
            }
        }
    }
    let _ = cli.custom; // the plugin table is not part of this build
    let _ = cli.reserved;
    let _ = cli.unbuffered; // stdout is flushed after every prompt already

    // environment, unless -e
    let mut rc_files: Vec<String> = Vec::new();
    if !cli.ignore_env {
        if let Ok(path) = std::env::var("CALCPATH") {
            rt.calc_path = path.split(':').map(PathBuf::from).collect();
        }
        if let Ok(rc) = std::env::var("CALCRC") {
            rc_files = rc.split(':').map(str::to_owned).take(16).collect();
        }
    }

    // rc files, unless -q
    if !cli.no_rc {
        for rc in &rc_files {
            if let Err(e) = rt.execute_file(rc) {
                eprintln!("{:?}", miette!("{}", e));
                if !cli.keep_going {
                    return 1;
                }
            }
        }
    }

    let treat_as_strings = cli.strings || cli.file.is_some();
    let mut had_commands = false;

    if let Some(file) = &cli.file {
        had_commands = true;
        if treat_as_strings {
            rt.argv = cli.operands.clone();
        }
        if let Err(e) = rt.execute_file(&file.to_string_lossy()) {
            eprintln!("{:?}", miette!("{}", e));
            if !cli.keep_going {
                return 1;
            }
        }
    }

    if !cli.operands.is_empty() {
        if treat_as_strings {
            rt.argv = cli.operands.clone();
        } else {
            had_commands = true;
            let program = cli.operands.join(" ");
            if let Err(e) = rt.execute_source(&program, None) {
                eprintln!("{:?}", miette!("{}", e));
                if !cli.keep_going {
                    return 1;
                }
            }
        }
    }

    if let Some(message) = rt.quit.take() {
        if let Some(m) = message {
            println!("{}", m);
        }
        return 0;
    }

    // interactive / pipe processing of stdin
    if cli.interactive || cli.pipe || !had_commands {
        if !cli.quiet && !cli.pipe {
            println!("abacus {} - an arbitrary-precision calculator", VERSION);
        }
        let stdin = std::io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            if !cli.pipe {
                print!("; ");
                let _ = std::io::stdout().flush();
            }
            let line = match lines.next() {
                Some(Ok(line)) => line,
                _ => break,
            };
            rt.abort_level = AbortLevel::None;
            if let Err(e) = rt.execute_source(&line, None) {
                eprintln!("{:?}", miette!("{}", e));
                if rt.conf.stoponerror {
                    return 1;
                }
            }
            if let Some(message) = rt.quit.take() {
                if let Some(m) = message {
                    println!("{}", m);
                }
                return 0;
            }
        }
    }

    0
}

fn print_help() {
    println!("usage: abacus [options] [-f file] [expression ...]");
    println!();
    println!("  -C         allow custom (plugin) builtins");
    println!("  -e         ignore environment variables");
    println!("  -h         print this help and exit");
    println!("  -i         go interactive after -f / commands");
    println!("  -m NNN     permission mask: 4 read, 2 write, 1 exec");
    println!("  -n         reserved");
    println!("  -O         use legacy-default configuration");
    println!("  -p         pipe mode: no prompts, read stdin");
    println!("  -q         do not run startup rc files");
    println!("  -u         unbuffered stdin/stdout");
    println!("  -c         continue on error");
    println!("  -d         silence the startup banner");
    println!("  -v         print version and exit");
    println!("  -D c:r:u   set calc, resource and user debug levels");
    println!("  -f FILE    execute FILE (implies -s)");
    println!("  -s         treat remaining operands as argv() strings");
}
