//! Interactive console chat with Qwen Omni models.
//!
//! This binary provides a streaming REPL for text, voice, image and video conversations with
//! an OpenAI-compatible omni model endpoint.
//!
//! # Usage
//!
//! ```bash
//! # Pick model and modes from menus
//! omnichat
//!
//! # Spoken responses streamed as they arrive, voice input
//! omnichat --output stream --input voice
//!
//! # Plain output for piping
//! omnichat --no-color --output text
//! ```
//!
//! The API key is taken from `--api-key`, then `DASHSCOPE_API_KEY`, then the settings file,
//! and finally asked for interactively (and saved).  Set `OMNICHAT_LOG=debug` for logs.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

use omnichat::audio::{
    CaptureConfig, ChunkPlayer, MicrophoneSource, NullPlayer, StreamingOutput, VoiceRecorder,
    play_wav,
};
use omnichat::chat::{
    ChatArgs, ChatCommand, ChatConfig, ChatSession, ChatWorker, ExchangeOutcome, InputMode,
    MediaAttachment, OutputMode, PersistedSettings, PlainTextRenderer, Renderer, drive_exchange,
    help_text, parse_command, require_question,
};
use omnichat::client::API_KEY_ENV;
use omnichat::codec::{PcmSpec, wav_from_pcm, write_wav_file};
use omnichat::{Error, KnownModel, Model, OmniClient};

/// Main entry point for the omnichat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("OMNICHAT_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (args, _) = ChatArgs::from_command_line_relaxed("omnichat [OPTIONS]");
    let config = match ChatConfig::try_from(args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("omnichat: {err}");
            std::process::exit(2);
        }
    };
    let mut renderer = PlainTextRenderer::with_color(config.use_color);
    let mut rl = DefaultEditor::new()?;

    let settings_path = config
        .config_path
        .clone()
        .unwrap_or_else(PersistedSettings::default_path);
    let mut settings = PersistedSettings::load_or_default(&settings_path);

    let Some(api_key) = resolve_api_key(&config, &mut settings, &settings_path, &mut rl) else {
        renderer.print_error("an API key is required to continue");
        std::process::exit(1);
    };
    let client = OmniClient::with_options(Some(api_key), config.base_url.clone(), None)?;
    tracing::info!(base_url = client.base_url(), "client ready");

    let mut config = config;
    if !config.model_given {
        config.model = choose_model(&mut rl, &settings.model);
    }
    if !config.output_given {
        config.output_mode = choose(&mut rl, "Output mode", &OutputMode::ALL, config.output_mode);
    }
    if !config.input_given {
        config.input_mode = choose(&mut rl, "Input mode", &InputMode::ALL, config.input_mode);
    }
    if settings.model != config.model {
        settings.model = config.model.clone();
        save_settings(&settings, &settings_path, &mut renderer);
    }

    let mut session = ChatSession::new(config);
    let mut worker = ChatWorker::new(Arc::new(client));
    // One output device handle for the session, so a failed device stays disabled.
    let mut output = StreamingOutput::for_responses();
    let mut recorder = VoiceRecorder::new();

    // Ctrl+C ends a recording early; at the prompt rustyline reports it instead.
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::Relaxed);
    })?;

    print_banner(&session);

    loop {
        interrupted.store(false, Ordering::Relaxed);
        let prompt = match session.input_mode() {
            InputMode::Text => "You: ",
            InputMode::Voice => "You (Enter to record): ",
            InputMode::Image => "You (question about an image): ",
            InputMode::Video => "You (question about a video): ",
        };
        let line = match rl.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {}", err));
                break;
            }
        };
        let line = line.trim().to_string();
        if !line.is_empty() {
            let _ = rl.add_history_entry(line.as_str());
        }

        let submitted = match parse_command(&line) {
            Some(ChatCommand::Quit) => {
                println!("Goodbye!");
                break;
            }
            Some(ChatCommand::Help) => {
                for line in help_text().lines() {
                    println!("    {}", line);
                }
                continue;
            }
            Some(ChatCommand::Clear) => {
                match session.clear() {
                    Ok(()) => renderer.print_info("Conversation cleared."),
                    Err(err) => renderer.print_error(&err.to_string()),
                }
                continue;
            }
            Some(ChatCommand::Model(name)) => {
                let model = Model::from(name);
                renderer.print_info(&format!("Model changed to: {}", model));
                session.set_model(model.clone());
                settings.model = model;
                save_settings(&settings, &settings_path, &mut renderer);
                continue;
            }
            Some(ChatCommand::Models) => {
                print_models(session.model());
                continue;
            }
            Some(ChatCommand::Output(mode)) => {
                session.set_output_mode(mode, &mut output);
                renderer.print_info(&format!("Output mode: {}", mode.describe()));
                continue;
            }
            Some(ChatCommand::Input(mode)) => {
                session.set_input_mode(mode);
                renderer.print_info(&format!("Input mode: {mode}"));
                continue;
            }
            Some(ChatCommand::Stats) => {
                print_stats(&session);
                continue;
            }
            Some(ChatCommand::Invalid(message)) => {
                renderer.print_error(&message);
                continue;
            }
            Some(ChatCommand::Retry) => session.retry(),
            Some(ChatCommand::Record(seconds)) => {
                let limit = seconds
                    .map(|s| Duration::from_secs(s as u64))
                    .unwrap_or(session.config().record_limit);
                match record(&mut recorder, limit, &interrupted, &mut renderer) {
                    Ok(audio) => session.submit_as(InputMode::Voice, "", audio),
                    Err(err) => Err(err),
                }
            }
            Some(ChatCommand::Image(path)) => {
                let Some((attachment, question)) =
                    ask_media(&mut rl, &mut renderer, InputMode::Image, path)
                else {
                    continue;
                };
                session.submit_as(InputMode::Image, &question, Some(attachment))
            }
            Some(ChatCommand::Video(path)) => {
                let Some((attachment, question)) =
                    ask_media(&mut rl, &mut renderer, InputMode::Video, path)
                else {
                    continue;
                };
                session.submit_as(InputMode::Video, &question, Some(attachment))
            }
            None => match session.input_mode() {
                InputMode::Text => session.submit(&line, None),
                InputMode::Voice => {
                    let limit = session.config().record_limit;
                    match record(&mut recorder, limit, &interrupted, &mut renderer) {
                        Ok(audio) => session.submit(&line, audio),
                        Err(err) => Err(err),
                    }
                }
                mode @ (InputMode::Image | InputMode::Video) => {
                    if let Err(err) = require_question(mode, &line) {
                        renderer.print_error(&err.to_string());
                        continue;
                    }
                    let Some(attachment) = ask_path(&mut rl, &mut renderer, mode, None) else {
                        continue;
                    };
                    session.submit(&line, Some(attachment))
                }
            },
        };

        if let Err(err) = submitted {
            renderer.print_error(&err.to_string());
            continue;
        }

        let mode = session.output_mode();
        let mut silent = NullPlayer::default();
        let player: &mut dyn ChunkPlayer = if mode == OutputMode::StreamingAudio {
            &mut output
        } else {
            &mut silent
        };
        match drive_exchange(&mut session, &mut worker, &mut renderer, player).await {
            Ok(ExchangeOutcome::Completed(reduced)) => {
                if mode == OutputMode::BufferedAudio && reduced.has_audio() {
                    let config = session.config();
                    deliver_audio(
                        &reduced.audio,
                        config.save_audio,
                        &config.audio_dir,
                        &mut output,
                        &mut renderer,
                    );
                }
            }
            Ok(ExchangeOutcome::Failed(_)) => {}
            Err(err) => renderer.print_error(&err.to_string()),
        }
    }

    output.teardown();
    Ok(())
}

fn resolve_api_key(
    config: &ChatConfig,
    settings: &mut PersistedSettings,
    settings_path: &Path,
    rl: &mut DefaultEditor,
) -> Option<String> {
    let non_empty = |key: &str| {
        let key = key.trim();
        (!key.is_empty()).then(|| key.to_string())
    };
    if let Some(key) = config.api_key.as_deref().and_then(non_empty) {
        return Some(key);
    }
    if let Some(key) = std::env::var(API_KEY_ENV).ok().as_deref().and_then(non_empty) {
        return Some(key);
    }
    if let Some(key) = settings.api_key.as_deref().and_then(non_empty) {
        return Some(key);
    }
    let key = rl.readline("Enter your DashScope API key: ").ok()?;
    let key = non_empty(&key)?;
    settings.api_key = Some(key.clone());
    if let Err(err) = settings.save(settings_path) {
        eprintln!("warning: could not save API key: {err}");
    }
    Some(key)
}

fn save_settings(settings: &PersistedSettings, path: &Path, renderer: &mut dyn Renderer) {
    if let Err(err) = settings.save(path) {
        renderer.print_diagnostic(&format!("could not save settings: {err}"));
    }
}

fn choose_model(rl: &mut DefaultEditor, current: &Model) -> Model {
    println!("Select a model:");
    print_models(current);
    let default = current.menu_index().map(|i| i + 1).unwrap_or(1);
    loop {
        let answer = match rl.readline(&format!("Model [{default}]: ")) {
            Ok(answer) => answer,
            Err(_) => return current.clone(),
        };
        let answer = answer.trim();
        if answer.is_empty() {
            return current.clone();
        }
        match answer.parse::<usize>() {
            Ok(index) => match index.checked_sub(1).and_then(|i| KnownModel::ALL.get(i)) {
                Some(model) => return Model::Known(*model),
                None => println!("Please enter 1-{} or a model name.", KnownModel::ALL.len()),
            },
            Err(_) => {
                if let Ok(model) = answer.parse::<Model>() {
                    return model;
                }
            }
        }
    }
}

fn choose<T>(rl: &mut DefaultEditor, label: &str, options: &[T], current: T) -> T
where
    T: Copy + PartialEq + std::fmt::Display + std::str::FromStr,
{
    println!("{label}:");
    for (i, option) in options.iter().enumerate() {
        let marker = if *option == current { " (current)" } else { "" };
        println!("  {}. {option}{marker}", i + 1);
    }
    loop {
        let answer = match rl.readline(&format!("{label} [{current}]: ")) {
            Ok(answer) => answer,
            Err(_) => return current,
        };
        let answer = answer.trim();
        if answer.is_empty() {
            return current;
        }
        match answer.parse::<T>() {
            Ok(choice) => return choice,
            Err(_) => println!("Please enter 1-{} or a name.", options.len()),
        }
    }
}

/// Record one voice turn.  `Ok(None)` is an empty recording, left for the turn builder to
/// reject.  Device failures disable recording for the rest of the session.
fn record(
    recorder: &mut VoiceRecorder,
    limit: Duration,
    interrupted: &AtomicBool,
    renderer: &mut PlainTextRenderer,
) -> Result<Option<MediaAttachment>, Error> {
    let config = CaptureConfig::new(limit);
    interrupted.store(false, Ordering::Relaxed);
    let outcome = tokio::task::block_in_place(|| {
        recorder.record(
            || MicrophoneSource::open(config.sample_rate),
            &config,
            interrupted,
            |elapsed, remaining| renderer.print_progress(elapsed, elapsed + remaining),
        )
    });
    renderer.finish_response();
    let outcome = outcome?;
    if outcome.cancelled {
        renderer.print_info("[recording stopped]");
    }
    renderer.print_info(&format!(
        "[recorded {:.1}s]",
        outcome.duration().as_secs_f64()
    ));
    MediaAttachment::recording(&outcome)
}

fn ask_path(
    rl: &mut DefaultEditor,
    renderer: &mut dyn Renderer,
    mode: InputMode,
    path: Option<String>,
) -> Option<MediaAttachment> {
    let path = match path {
        Some(path) => path,
        None => rl.readline(&format!("Path to {mode} file: ")).ok()?,
    };
    let path = PathBuf::from(path.trim().trim_matches('"'));
    if path.as_os_str().is_empty() {
        return None;
    }
    let loaded = match mode {
        InputMode::Video => MediaAttachment::video_from_file(&path),
        _ => MediaAttachment::image_from_file(&path),
    };
    match loaded {
        Ok(attachment) => Some(attachment),
        Err(err) => {
            renderer.print_error(&err.to_string());
            None
        }
    }
}

fn ask_media(
    rl: &mut DefaultEditor,
    renderer: &mut dyn Renderer,
    mode: InputMode,
    path: Option<String>,
) -> Option<(MediaAttachment, String)> {
    let attachment = ask_path(rl, renderer, mode, path)?;
    let question = rl
        .readline(&format!("Question about the {mode}: "))
        .ok()?;
    Some((attachment, question))
}

fn deliver_audio(
    pcm: &[u8],
    save: bool,
    dir: &Path,
    output: &mut StreamingOutput,
    renderer: &mut dyn Renderer,
) {
    let saved = if save {
        match save_audio(pcm, dir) {
            Ok((path, wav)) => {
                renderer.print_info(&format!("[audio saved to {}]", path.display()));
                Some(wav)
            }
            Err(err) => {
                renderer.print_diagnostic(&format!("could not save audio: {err}"));
                None
            }
        }
    } else {
        None
    };
    let wav = match saved {
        Some(wav) => wav,
        None => match wav_from_pcm(pcm, PcmSpec::RESPONSE) {
            Ok(wav) => wav,
            Err(err) => {
                renderer.print_error(&err.to_string());
                return;
            }
        },
    };
    let played = tokio::task::block_in_place(|| {
        let played = play_wav(output, &wav);
        output.teardown();
        played
    });
    if let Err(err) = played {
        renderer.print_error(&format!("audio playback failed: {err}"));
    }
}

/// Write `response_<unix-seconds>.wav` under `dir` and return its path and contents.
fn save_audio(pcm: &[u8], dir: &Path) -> Result<(PathBuf, Vec<u8>), Error> {
    fs::create_dir_all(dir)
        .map_err(|e| Error::io(format!("failed to create {}", dir.display()), e))?;
    let path = dir.join(format!(
        "response_{}.wav",
        OffsetDateTime::now_utc().unix_timestamp()
    ));
    write_wav_file(&path, pcm, PcmSpec::RESPONSE)?;
    let wav =
        fs::read(&path).map_err(|e| Error::io(format!("failed to read {}", path.display()), e))?;
    Ok((path, wav))
}

fn print_banner(session: &ChatSession) {
    let config = session.config();
    println!();
    println!("Omni Chat (model: {})", config.model);
    println!(
        "Output: {} | Input: {} | Voice: {}",
        config.output_mode.describe(),
        config.input_mode,
        config.voice
    );
    println!("Type 'record', 'image' or 'video' for one-off media, /help for commands.");
    println!("Type 'exit' or '退出' to quit.\n");
}

fn print_models(current: &Model) {
    for (i, model) in KnownModel::ALL.iter().enumerate() {
        let marker = if current == &Model::Known(*model) {
            " (current)"
        } else {
            ""
        };
        println!("  {}. {model}{marker}", i + 1);
    }
    if let Model::Custom(name) = current {
        println!("  current: {name}");
    }
}

fn print_stats(session: &ChatSession) {
    let stats = session.stats();
    println!("    Session Statistics:");
    println!("      Model: {}", stats.model);
    println!("      Output: {}", stats.output_mode.describe());
    println!("      Input: {}", stats.input_mode);
    println!("      Voice: {}", stats.voice);
    println!("      Messages: {}", stats.message_count);
    println!(
        "      Total tokens: {} prompt / {} completion ({} requests, {} failed)",
        stats.total_prompt_tokens,
        stats.total_completion_tokens,
        stats.total_requests,
        stats.failed_requests
    );
    if let Some(usage) = stats.last_turn_usage {
        println!(
            "      Last turn tokens: {} prompt / {} completion",
            usage.prompt_tokens, usage.completion_tokens
        );
    }
    if stats.retry_pending {
        println!("      A failed message is waiting for /retry");
    }
}
