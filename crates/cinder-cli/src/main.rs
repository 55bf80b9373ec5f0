//! cinder CLI — terminal player over the cinder transport.
//!
//! Commands:
//!   cinder play [path...]      Play the built-in synth tracks plus any files
//!   cinder list [path...]      Show the playlist `play` would build
//!   cinder import <dir>        Print ingestion entries as JSON lines
//!
//! `--headless` keeps time without opening an audio device. A JSON config
//! file named by `CINDER_CONFIG` overrides transport defaults.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use cinder_core::effects::import;
use cinder_core::{
    default_tracks, Intent, LoopMode, MutePhase, Track, Transport, TransportConfig, TransportEvent,
    TransportState,
};

const REFRESH: Duration = Duration::from_millis(250);

fn main() {
    env_logger::init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let headless = take_flag(&mut args, "--headless");
    if args.is_empty() {
        print_usage();
        return;
    }

    let config = match std::env::var("CINDER_CONFIG") {
        Ok(path) => TransportConfig::load(Path::new(&path)),
        Err(_) => TransportConfig::default(),
    };

    match args[0].as_str() {
        "play" => cmd_play(&args[1..], config, headless),
        "list" => cmd_list(&args[1..]),
        "import" => cmd_import(&args[1..]),
        other => {
            eprintln!("unknown command: {}", other);
            print_usage();
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_play(paths: &[String], config: TransportConfig, headless: bool) {
    let opened = if headless {
        Transport::headless(default_tracks(), config)
    } else {
        Transport::native(default_tracks(), config)
    };
    let transport = match opened {
        Ok(t) => t,
        Err(e) => {
            eprintln!("cannot open transport: {}", e);
            return;
        }
    };

    let imported = transport.append_entries(import::entries_for_paths(paths));
    if !imported.is_empty() {
        println!("imported {} tracks", imported.len());
        if let Err(e) = transport.select(imported.start) {
            eprintln!("{}", e);
        }
    }

    let events = transport.subscribe();
    transport.start();
    if let Err(e) = transport.play() {
        eprintln!("{}", e);
    }
    print_keys();

    let (line_tx, line_rx) = mpsc::channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    'repl: loop {
        match line_rx.recv_timeout(REFRESH) {
            Ok(line) => match parse_command(&line) {
                Some(Command::Quit) => break 'repl,
                Some(Command::Help) => print_keys(),
                Some(Command::Intent(intent)) => {
                    // Reportable failures also arrive as status events.
                    if let Err(e) = transport.dispatch(intent) {
                        log::debug!("cinder: intent failed: {}", e);
                    }
                }
                None => println!("\n  ? unknown key: {:?} (h for help)", line),
            },
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break 'repl,
        }

        for event in events.try_iter() {
            match event {
                TransportEvent::Status { message } => println!("\n  ! {}", message),
                TransportEvent::TrackChanged { index, .. } => {
                    let track = &transport.playlist()[index];
                    println!("\n  > {} -- {}", track.title, track.artist);
                }
                TransportEvent::TrackEnded { .. } | TransportEvent::MuteChanged { .. } => {}
            }
        }
        print_progress(&transport.current_track(), &transport.state());
    }

    println!();
    transport.shutdown();
}

fn cmd_list(paths: &[String]) {
    let mut tracks = default_tracks();
    tracks.extend(
        import::entries_for_paths(paths)
            .into_iter()
            .map(Track::from_entry),
    );
    for (i, track) in tracks.iter().enumerate() {
        let length = if track.duration_secs > 0.0 {
            fmt_time(track.duration_secs)
        } else {
            "--:--".to_string()
        };
        println!(
            "{:>3}  {:<28} {:<20} {:>6}  {:?}",
            i + 1,
            track.title,
            track.artist,
            length,
            track.kind()
        );
    }
}

fn cmd_import(args: &[String]) {
    if args.is_empty() {
        eprintln!("usage: cinder import <dir>");
        return;
    }
    let entries = import::entries_for_paths(args);
    for entry in &entries {
        match serde_json::to_string(entry) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{}: {}", entry.locator, e),
        }
    }
    eprintln!("{} entries", entries.len());
}

// ---------------------------------------------------------------------------
// Key parsing
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Command {
    Intent(Intent),
    Help,
    Quit,
}

/// One typed line to a command. A bare space or an empty line toggles play.
fn parse_command(line: &str) -> Option<Command> {
    let trimmed = line.trim();
    let intent = match trimmed {
        "" | "p" => Intent::Toggle,
        "m" => Intent::ToggleMute,
        "+" | "=" => Intent::AdjustVolume { delta: 0.1 },
        "-" => Intent::AdjustVolume { delta: -0.1 },
        ">" | "." => Intent::SeekBy { seconds: 5.0 },
        "<" | "," => Intent::SeekBy { seconds: -5.0 },
        "n" => Intent::Next,
        "b" => Intent::Prev,
        "l" => Intent::ToggleLoopMode,
        "h" | "?" => return Some(Command::Help),
        "q" | "quit" => return Some(Command::Quit),
        other => {
            let (word, arg) = other.split_once(char::is_whitespace)?;
            let arg = arg.trim();
            match word {
                "seek" => Intent::SeekTo {
                    percent: arg.parse().ok()?,
                },
                "vol" => Intent::SetVolume {
                    volume: arg.parse::<f32>().ok()? / 100.0,
                },
                "go" => Intent::Select {
                    index: arg.parse::<usize>().ok()?.checked_sub(1)?,
                },
                _ => return None,
            }
        }
    };
    Some(Command::Intent(intent))
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_progress(track: &Track, state: &TransportState) {
    let bar_width = 30;
    let filled = ((state.progress_percent / 100.0) * bar_width as f64) as usize;
    let filled = filled.min(bar_width);
    let volume = match (state.muted, state.mute_phase) {
        (_, MutePhase::Breaking) => "breaking".to_string(),
        (_, MutePhase::Healing) => "healing".to_string(),
        (true, MutePhase::Idle) => "muted".to_string(),
        (false, MutePhase::Idle) => format!("{}%", (state.volume * 100.0).round() as u32),
    };
    let loop_mark = match state.loop_mode {
        LoopMode::LoopQueue => "queue",
        LoopMode::LoopTrack => "track",
    };
    let duration = if state.duration_secs > 0.0 {
        fmt_time(state.duration_secs)
    } else {
        "--:--".to_string()
    };

    print!(
        "\r  {} {} -- {}  [{}{}] {} / {}  vol: {}  loop: {}    ",
        if state.is_playing { ">" } else { "=" },
        track.title,
        track.artist,
        "=".repeat(filled),
        " ".repeat(bar_width - filled),
        fmt_time(state.current_time_secs),
        duration,
        volume,
        loop_mark,
    );
    std::io::stdout().flush().ok();
}

fn fmt_time(secs: f64) -> String {
    let secs = secs.max(0.0) as u64;
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    let before = args.len();
    args.retain(|a| a != flag);
    args.len() != before
}

fn print_keys() {
    println!("keys (then enter):");
    println!("  p / enter   play / pause        m         mute / unmute");
    println!("  + / -       volume +-10%        > / <     seek +-5 s");
    println!("  n / b       next / previous     l         loop queue / track");
    println!("  seek <pct>  seek to percent     vol <pct> set volume");
    println!("  go <n>      jump to track n     q         quit");
}

fn print_usage() {
    println!("cinder - terminal player");
    println!();
    println!("usage: cinder [--headless] <command> [args]");
    println!();
    println!("commands:");
    println!("  play [path...]         Play built-in tracks plus files / directories");
    println!("  list [path...]         Show the playlist");
    println!("  import <dir>           Print ingestion entries as JSON lines");
    println!();
    println!("env:");
    println!("  CINDER_CONFIG          JSON transport config file");
    println!("  RUST_LOG               log filter (env_logger)");
}
