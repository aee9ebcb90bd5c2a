//! keyfall - a terminal falling-notes piano recorder.
//!
//! Live MIDI comes in over USB (and BLE where the platform provides a link),
//! or from the on-screen keyboard; recordings replay as Synthesia-style
//! falling notes synchronized to a logical clock.
//!
//! # Usage
//!
//! ```bash
//! cargo run                         # sine voices, library in ./recordings
//! cargo run -- --soundfont piano.sf2
//! cargo run -- --list-ports        # print USB MIDI ports and exit
//! ```
//!
//! Press `R` to record, `Space` to play the selected take, `?` in the status
//! bar shows the note keys.

mod app;
mod audio;
mod clock;
mod midi;
mod session;
mod store;
mod transport;
mod ui;

use app::App;

use anyhow::{Context, Result};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, KeyModifiers,
    MouseButton, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::time::Duration;

/// Command-line options for the application.
struct CliOptions {
    /// Recording library directory.
    dir: PathBuf,
    /// Path to a SoundFont file for synthesis.
    soundfont: Option<PathBuf>,
    /// Print USB MIDI ports and exit.
    list_ports: bool,
    /// Import a recording document before starting.
    import: Option<PathBuf>,
}

impl CliOptions {
    /// Parses command-line arguments.
    ///
    /// Supports:
    /// - `--dir <path>`: recording library location (default ./recordings)
    /// - `--soundfont <path>` or `-sf <path>`: SoundFont file (.sf2)
    /// - `--list-ports`: print USB MIDI input ports and exit
    /// - `--import <file>`: import a recording JSON document, then start
    /// - `--help` or `-h`: print help and exit
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let mut dir = PathBuf::from("recordings");
        let mut soundfont: Option<PathBuf> = None;
        let mut list_ports = false;
        let mut import: Option<PathBuf> = None;
        let mut i = 1;

        while i < args.len() {
            match args[i].as_str() {
                "--dir" => {
                    i += 1;
                    if i >= args.len() {
                        eprintln!("Error: --dir requires a path argument");
                        std::process::exit(1);
                    }
                    dir = PathBuf::from(&args[i]);
                }
                "--soundfont" | "-sf" => {
                    i += 1;
                    if i >= args.len() {
                        eprintln!("Error: --soundfont requires a path argument");
                        std::process::exit(1);
                    }
                    soundfont = Some(PathBuf::from(&args[i]));
                }
                "--import" => {
                    i += 1;
                    if i >= args.len() {
                        eprintln!("Error: --import requires a file argument");
                        std::process::exit(1);
                    }
                    import = Some(PathBuf::from(&args[i]));
                }
                "--list-ports" => list_ports = true,
                "--help" | "-h" => {
                    eprintln!("keyfall - terminal falling-notes piano recorder");
                    eprintln!();
                    eprintln!(
                        "Usage: {} [OPTIONS]",
                        args.first().map(String::as_str).unwrap_or("keyfall")
                    );
                    eprintln!();
                    eprintln!("Options:");
                    eprintln!("  --dir PATH             Recording library directory (default: ./recordings)");
                    eprintln!("  -sf, --soundfont PATH  Load a SoundFont file (.sf2) for synthesis");
                    eprintln!("  --import FILE          Import a recording JSON document, then start");
                    eprintln!("  --list-ports           Print USB MIDI input ports and exit");
                    eprintln!("  -h, --help             Print this help message");
                    eprintln!();
                    eprintln!("Without a soundfont, notes play as plain sine voices.");
                    std::process::exit(0);
                }
                other => {
                    if other.ends_with(".sf2") {
                        soundfont = Some(PathBuf::from(other));
                    } else {
                        eprintln!("Unknown option: {}", other);
                        eprintln!("Use --help for usage information");
                        std::process::exit(1);
                    }
                }
            }
            i += 1;
        }

        Ok(Self {
            dir,
            soundfont,
            list_ports,
            import,
        })
    }
}

/// Main entry point.
fn main() -> Result<()> {
    // Parse CLI options first (before any terminal setup)
    let cli = CliOptions::parse()?;

    // Initialize logging (optional, for debugging)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if cli.list_ports {
        return list_usb_ports();
    }

    if let Some(ref soundfont) = cli.soundfont {
        if !soundfont.exists() {
            eprintln!("Warning: soundfont not found: {}", soundfont.display());
            eprintln!("Continuing with sine voices.");
        }
    }
    let soundfont = cli.soundfont.filter(|p| p.exists());

    // The BLE radio is a platform collaborator; no desktop link is bundled,
    // so the adapter starts unavailable and reports that in the UI.
    let mut app =
        App::new(cli.dir, soundfont, None).context("Failed to initialize application")?;
    if !app.audio.available() {
        app.set_status("No audio device found; running silent");
    }

    if let Some(path) = cli.import {
        let document = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let imported = app
            .store
            .import(&document)
            .with_context(|| format!("Failed to import {}", path.display()))?;
        app.refresh_recordings();
        app.set_status(format!("Imported \"{}\"", imported.name));
    }

    let mut terminal = setup_terminal().context("Failed to setup terminal")?;

    // Run main loop
    let result = run_app(&mut terminal, &mut app);

    // Restore terminal
    restore_terminal(&mut terminal).context("Failed to restore terminal")?;

    result
}

/// Prints the USB MIDI input ports the OS reports, then exits.
fn list_usb_ports() -> Result<()> {
    use midir::MidiInput;

    let midi_in = MidiInput::new("keyfall-list").context("USB MIDI is not available")?;
    let ports = midi_in.ports();
    if ports.is_empty() {
        println!("No USB MIDI input ports found.");
        return Ok(());
    }
    println!("USB MIDI input ports:");
    for (index, port) in ports.iter().enumerate() {
        let name = midi_in
            .port_name(port)
            .unwrap_or_else(|_| "<unreadable>".to_string());
        println!("  {}: {}", index, name);
    }
    Ok(())
}

/// Sets up the terminal for TUI rendering.
fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .context("Failed to enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend).context("Failed to create terminal")?;
    Ok(terminal)
}

/// Restores the terminal to its original state.
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode().context("Failed to disable raw mode")?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )
    .context("Failed to leave alternate screen")?;
    terminal.show_cursor().context("Failed to show cursor")?;
    Ok(())
}

/// Main application loop: ~60 Hz tick shared by the engines and the UI.
fn run_app(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &mut App) -> Result<()> {
    loop {
        app.update();
        app.clear_expired_status();

        terminal.draw(|frame| ui::render(frame, app))?;

        // Handle events with a short timeout to keep the clock ticking.
        if event::poll(Duration::from_millis(16))? {
            match event::read()? {
                Event::Key(key) => {
                    if key.kind == KeyEventKind::Press {
                        // Rename dialog swallows input while open.
                        if app.rename_dialog.is_some() {
                            match key.code {
                                KeyCode::Enter => app.rename_dialog_confirm(),
                                KeyCode::Esc => app.rename_dialog_cancel(),
                                KeyCode::Backspace => app.rename_dialog_backspace(),
                                KeyCode::Char(c) => app.rename_dialog_input(c),
                                _ => {}
                            }
                            continue;
                        }

                        if handle_key(app, key.code, key.modifiers) {
                            break;
                        }
                    } else if key.kind == KeyEventKind::Release {
                        // Note key releases end the corresponding note.
                        if let KeyCode::Char(c) = key.code {
                            app.handle_note_key_release(c);
                        }
                    }
                }
                Event::Mouse(mouse) => match mouse.kind {
                    MouseEventKind::Down(MouseButton::Left) => {
                        app.handle_mouse_down(mouse.column, mouse.row);
                    }
                    MouseEventKind::Up(MouseButton::Left) => {
                        app.handle_mouse_up();
                    }
                    _ => {}
                },
                _ => {}
            }
        }
    }

    Ok(())
}

/// Handles a key press event.
///
/// # Returns
///
/// `true` if the application should quit
fn handle_key(app: &mut App, code: KeyCode, modifiers: KeyModifiers) -> bool {
    match code {
        // Quit
        KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => return true,
        KeyCode::Char('q') if modifiers.contains(KeyModifiers::CONTROL) => return true,
        KeyCode::Char('Q') => return true,

        // Recording / playback
        KeyCode::Char('R') => app.toggle_recording(),
        KeyCode::Char(' ') | KeyCode::Enter => app.toggle_playback(),
        KeyCode::Char('C') => app.clear_recording(),

        // Library
        KeyCode::Up | KeyCode::Char('K') => app.select_recording(-1),
        KeyCode::Down | KeyCode::Char('J') => app.select_recording(1),
        KeyCode::Char('X') | KeyCode::Delete => app.delete_selected(),
        KeyCode::Char('E') => app.export_selected(),
        KeyCode::F(2) => app.open_rename_dialog(),

        // Devices
        KeyCode::Char('U') => app.usb_refresh_and_connect(),
        KeyCode::Char('B') => app.ble_toggle_scan(),
        KeyCode::Char('P') => app.ble_connect_first(),
        KeyCode::Char('D') => app.ble_disconnect(),

        // Octave shift for the note keys
        KeyCode::Char(',') => app.change_octave(-1),
        KeyCode::Char('/') => app.change_octave(1),

        // Focus
        KeyCode::Tab => app.cycle_focus(),

        // Escape stops whatever is running and releases stuck keys.
        KeyCode::Esc => {
            if app.playback.is_playing() {
                app.toggle_playback();
            }
            app.release_all_keys();
        }

        // Everything else: note keys.
        KeyCode::Char(c) => {
            app.handle_note_key(c);
        }

        _ => {}
    }

    false
}
