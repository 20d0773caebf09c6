use clap::{Parser, Subcommand, ValueEnum};
use meeting_core::{Config, MeetingConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "meeting-core")]
#[command(author = "Meeting Core Team")]
#[command(version)]
#[command(about = "WebRTC mesh meeting client core", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "meeting-core.toml")]
    pub config: PathBuf,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Join a meeting through a WebSocket signaling server until Ctrl-C
    Join {
        /// Signaling endpoint (overrides config)
        #[arg(long)]
        url: Option<String>,

        /// Local user id (overrides config)
        #[arg(long)]
        user: Option<String>,

        /// Meeting id
        #[arg(long)]
        meeting: String,

        /// Meeting type
        #[arg(long, value_enum, default_value = "group")]
        kind: MeetingKind,

        /// Group id or conversation id, depending on the meeting type
        #[arg(long)]
        scope: String,

        /// Meeting title kept with the stored meeting record
        #[arg(long)]
        title: Option<String>,

        /// Join without microphone
        #[arg(long, action)]
        no_audio: bool,

        /// Join without camera
        #[arg(long, action)]
        no_video: bool,
    },

    /// Run participants against an in-process signaling hub and report convergence
    Loopback {
        /// Number of participants
        #[arg(short, long, default_value = "3")]
        participants: usize,

        /// Seconds to wait for every pair to exchange media
        #[arg(long, default_value = "20")]
        timeout_secs: u64,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeetingKind {
    Group,
    Direct,
}

impl MeetingKind {
    pub fn config(&self, meeting_id: &str, scope_id: &str) -> MeetingConfig {
        match self {
            MeetingKind::Group => MeetingConfig::group(meeting_id, scope_id),
            MeetingKind::Direct => MeetingConfig::direct(meeting_id, scope_id),
        }
    }
}

impl Args {
    pub fn load_config(&self) -> Result<Config, Box<dyn std::error::Error>> {
        Config::load(&self.config)
    }
}
