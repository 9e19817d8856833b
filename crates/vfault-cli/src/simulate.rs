//! `vfault simulate`: one synthetic fault through the portable handler chain.

use std::panic;

use anyhow::{Context, Result};
use clap::Args;
use vfault_config::{BuildMode, Config, TracebackLevel};
use vfault_core::console::StderrConsole;
use vfault_core::sim::{self, SimOutcome, SimThread, UnwindingProcess, SIM_TEXT_START};
use vfault_core::{Arch, ExceptionCode, ExceptionRecord, MachineContext, RegistrationPlan, SyntheticContext};

/// Default faulting pc: inside the simulated runtime text.
const DEFAULT_IP: usize = SIM_TEXT_START + 0x1234;

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Exception code: a name such as `access-violation`, or a numeric code
    #[arg(long, value_parser = parse_code, default_value = "access-violation")]
    pub code: ExceptionCode,

    /// Faulting instruction address
    #[arg(long, value_parser = parse_addr, default_value_t = DEFAULT_IP)]
    pub ip: usize,

    /// Faulting data address (second exception parameter)
    #[arg(long, value_parser = parse_addr, default_value_t = 0)]
    pub addr: usize,

    /// Link register value on arm targets
    #[arg(long, value_parser = parse_addr, default_value_t = 0)]
    pub lr: usize,

    /// Target architecture
    #[arg(long, default_value_t = Arch::HOST)]
    pub arch: Arch,

    /// The faulting task panics on any bad address, not only low ones
    #[arg(long)]
    pub panic_on_fault: bool,

    /// The faulting task is forbidden from growing its stack
    #[arg(long)]
    pub no_stack_growth: bool,

    /// Fault on a thread the runtime did not create
    #[arg(long, conflicts_with = "system_stack")]
    pub foreign_thread: bool,

    /// Fault while on the system stack
    #[arg(long)]
    pub system_stack: bool,

    /// Fault while the task is calling out to foreign code
    #[arg(long)]
    pub in_foreign_call: bool,

    /// Panics are not allowed at the fault site
    #[arg(long)]
    pub cannot_panic: bool,

    /// Register as if vectored continue handlers were unavailable
    #[arg(long)]
    pub no_continue_api: bool,

    /// Override the configured traceback level
    #[arg(long)]
    pub traceback: Option<TracebackLevel>,

    /// Override the configured build mode
    #[arg(long)]
    pub build_mode: Option<BuildMode>,

    /// Leave unhandled faults to the OS default handler
    #[arg(long)]
    pub wer_passthrough: bool,
}

fn parse_code(s: &str) -> Result<ExceptionCode, String> {
    ExceptionCode::parse(s).ok_or_else(|| format!("unknown exception code: {s}"))
}

fn parse_addr(s: &str) -> Result<usize, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(&hex.replace('_', ""), 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address {s:?}: {e}"))
}

impl SimulateArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(level) = self.traceback {
            config.traceback.level = level;
        }
        if let Some(mode) = self.build_mode {
            config.runtime.build_mode = mode;
        }
        if self.wer_passthrough {
            config.testing.wer_passthrough = true;
        }
    }

    fn thread(&self) -> SimThread {
        if self.foreign_thread {
            return SimThread::foreign();
        }
        let mut thread = SimThread::user(1);
        if self.system_stack {
            thread = thread.on_system_stack();
        }
        if self.in_foreign_call {
            thread = thread.in_foreign_call();
        }
        if self.cannot_panic {
            thread = thread.cannot_panic();
        }
        thread.task().set_panic_on_fault(self.panic_on_fault);
        thread.task().set_must_not_grow_stack(self.no_stack_growth);
        thread
    }
}

/// Build a coordinator from `config` and the overrides in `args`, deliver
/// the fault, and print the outcome to stdout.
pub fn run(args: &SimulateArgs, mut config: Config) -> Result<SimOutcome> {
    args.apply(&mut config);
    let coordinator = sim::coordinator(&config, UnwindingProcess::new(), StderrConsole)
        .context("Failed to build fault coordinator")?;

    let thread = args.thread();
    let plan = RegistrationPlan::for_arch(args.arch, !args.no_continue_api);
    let record = ExceptionRecord::new(args.code, 0, args.addr);
    let mut ctx = SyntheticContext::new(args.arch, args.ip);
    if args.lr != 0 {
        ctx = ctx.with_lr(args.lr);
    }

    vfault_config::log_cli_info!(
        "Delivering synthetic fault",
        code = tracing::field::debug(args.code),
        arch = args.arch.name(),
        ip = args.ip,
        addr = args.addr,
    );

    // The panic entry raises with panic_any; the outcome is reported below.
    let hook = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));
    let outcome = sim::run_fault(&coordinator, &thread, &plan, &record, &mut ctx);
    panic::set_hook(hook);

    match &outcome {
        SimOutcome::Panicked(err) => {
            println!("outcome: panic");
            println!("panic: {err}");
        }
        SimOutcome::Exited(code) => println!("outcome: exit {code}"),
        SimOutcome::Resumed => println!("outcome: resumed"),
        SimOutcome::OsDefault => println!("outcome: os-default"),
    }
    let (ip, sp, lr) = args.arch.register_names();
    println!(
        "{ip}={:#x} {sp}={:#x} {lr}={:#x}",
        ctx.ip(),
        ctx.sp(),
        ctx.lr()
    );
    Ok(outcome)
}
