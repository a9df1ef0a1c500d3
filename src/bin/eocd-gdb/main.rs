// SPDX-License-Identifier: MIT OR Apache-2.0

mod commands;

use clap::builder::styling::Styles;
use clap::{Parser, Subcommand, crate_description, crate_version};
use color_eyre::config::HookBuilder;
use color_eyre::eyre::{EyreHandler, InstallError, Result};
use owo_colors::OwoColorize;

use commands::gdb::GdbArgs;

#[derive(Parser)]
#[command(
    version,
    about = format!("{} v{}", crate_description!(), crate_version!()),
    styles(style()),
    disable_colored_help(false)
)]
struct CliArguments
{
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command
{
    /// Select an adapter, bring up the daemon, probe the target, and exec GDB against it.
    Gdb(GdbArgs),
    /// List connected adapters this tool recognizes.
    List,
    /// Reserved for future tool version.
    Setup,
    /// Reserved for future tool version.
    Program,
    /// Stop every daemon and PTY-holder this tool has rendezvous records for.
    Stop,
}

type EyreHookFunc = Box<dyn Fn(&(dyn std::error::Error + 'static)) -> Box<dyn EyreHandler> + Send + Sync + 'static>;
type PanicHookFunc = Box<dyn Fn(&std::panic::PanicHookInfo<'_>) + Send + Sync + 'static>;

struct EocdHook
{
    inner_hook: EyreHookFunc,
}

struct EocdPanic
{
    inner_hook: PanicHookFunc,
}

struct EocdHandler
{
    inner_handler: Box<dyn EyreHandler>,
}

impl EocdHook
{
    fn build_handler(&self, error: &(dyn std::error::Error + 'static)) -> EocdHandler
    {
        EocdHandler { inner_handler: (*self.inner_hook)(error) }
    }

    pub fn install(self) -> Result<(), InstallError>
    {
        color_eyre::eyre::set_hook(self.into_eyre_hook())
    }

    pub fn into_eyre_hook(self) -> EyreHookFunc
    {
        Box::new(move |err| Box::new(self.build_handler(err)))
    }
}

impl EocdPanic
{
    pub fn install(self)
    {
        std::panic::set_hook(self.into_panic_hook());
    }

    pub fn into_panic_hook(self) -> PanicHookFunc
    {
        Box::new(move |panic_info| {
            self.print_header();
            (*self.inner_hook)(panic_info);
            self.print_footer();
        })
    }

    fn print_header(&self)
    {
        eprintln!("------------[ ✂ cut here ✂ ]------------");
        eprintln!("Unhandled crash in eocd-gdb v{}", crate_version!());
        eprintln!();
    }

    fn print_footer(&self)
    {
        eprintln!();
        eprintln!("{}", "Please include all lines down to this one from the cut here".yellow());
        eprintln!("{}", "marker, and report this issue to your issue tracker.".yellow());
    }
}

impl EyreHandler for EocdHandler
{
    fn debug(&self, error: &(dyn std::error::Error + 'static), fmt: &mut core::fmt::Formatter<'_>) -> core::fmt::Result
    {
        writeln!(fmt, "------------[ ✂ cut here ✂ ]------------")?;
        write!(fmt, "Unhandled crash in eocd-gdb v{}", crate_version!())?;
        self.inner_handler.debug(error, fmt)?;
        writeln!(fmt)?;
        writeln!(fmt)?;
        writeln!(fmt, "{}", "Please include all lines down to this one from the cut here".yellow())?;
        write!(fmt, "{}", "marker, and report this issue to your issue tracker.".yellow())
    }

    fn track_caller(&mut self, location: &'static std::panic::Location<'static>)
    {
        self.inner_handler.track_caller(location);
    }
}

fn install_error_handler() -> Result<()>
{
    let default_handler = HookBuilder::default();
    let (panic_hook, eyre_hook) = default_handler.try_into_hooks()?;

    EocdPanic { inner_hook: panic_hook.into_panic_hook() }.install();
    EocdHook { inner_hook: eyre_hook.into_eyre_hook() }.install()?;
    Ok(())
}

/// Clap v3 style (approximate). See <https://stackoverflow.com/a/75343828>.
fn style() -> Styles
{
    Styles::styled()
        .usage(anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))).bold())
        .header(anstyle::Style::new().bold().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))))
        .literal(anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))))
}

fn main()
{
    if pty_holder_reexec() {
        return;
    }

    if let Err(report) = install_error_handler() {
        eprintln!("failed to install error handler: {report}");
    }
    env_logger::Builder::new().filter_level(log::LevelFilter::Warn).parse_default_env().init();

    let cli_args = CliArguments::parse();

    let outcome = match &cli_args.command {
        Command::Gdb(gdb_args) => commands::gdb::run(gdb_args),
        Command::List => commands::list::run(),
        Command::Setup => commands::reserved::run("setup"),
        Command::Program => commands::reserved::run("program"),
        Command::Stop => commands::stop::run(),
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(err.kind.exit_code());
        },
    }
}

/// Checks for the hidden PTY-holder re-exec flag before any normal argument parsing happens -
/// this invocation form is never user-facing and must not show up in `--help`.
fn pty_holder_reexec() -> bool
{
    let args: Vec<String> = std::env::args().collect();
    if !eocd::pty::is_pty_holder_invocation(&args) {
        return false;
    }

    let holder_name = args.get(2).cloned().unwrap_or_default();
    let program = args.get(3).cloned().unwrap_or_default();
    let program_args: Vec<String> = args.iter().skip(4).cloned().collect();

    if let Err(e) = eocd::pty::run_pty_holder_child(&holder_name, &program, &program_args) {
        eprintln!("pty-holder child exited with error: {e}");
    }
    true
}
