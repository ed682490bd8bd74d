use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use sicaf_capture::config::KioskConfig;
use sicaf_capture::control::ControlType;
use sicaf_capture::submit::RecordType;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (default: user config dir, then /etc/sicaf)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Base URL of the SICAF API
    #[arg(long)]
    pub api: Option<String>,

    /// Download the face model files when missing
    #[arg(long, default_value_t = false)]
    pub download_models: bool,

    /// Skip the smile liveness challenge
    #[arg(long, default_value_t = false)]
    pub no_smile: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the attendance kiosk
    Asistencia {
        #[arg(long, value_enum)]
        tipo: Turno,
    },
    /// Run the entry/exit time control kiosk
    Control {
        #[arg(long, value_enum)]
        tipo: Sentido,
        #[arg(long, default_value = "JORNADA")]
        categoria: String,
    },
    /// Capture one face for personnel registration
    Enroll {
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turno {
    EntradaManana,
    SalidaManana,
    EntradaTarde,
    SalidaTarde,
}

impl From<Turno> for RecordType {
    fn from(turno: Turno) -> Self {
        match turno {
            Turno::EntradaManana => RecordType::EntradaManana,
            Turno::SalidaManana => RecordType::SalidaManana,
            Turno::EntradaTarde => RecordType::EntradaTarde,
            Turno::SalidaTarde => RecordType::SalidaTarde,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentido {
    Entrada,
    Salida,
}

impl From<Sentido> for ControlType {
    fn from(sentido: Sentido) -> Self {
        match sentido {
            Sentido::Entrada => ControlType::Entrada,
            Sentido::Salida => ControlType::Salida,
        }
    }
}

impl Args {
    /// Command line overrides on top of the file configuration.
    pub fn apply(&self, config: &mut KioskConfig) {
        if let Some(api) = &self.api {
            config.api.base_url = api.clone();
        }
        if self.no_smile {
            config.settings.require_smile = false;
        }
    }
}
