//! Sign a local PDF against the configured signing authority.
//!
//! Usage:
//!   firmador_sign --input in.pdf --output out.pdf --rut 0123456785
//!   firmador_sign --input in.pdf --output out.pdf --rut 0123456785 --password <base64> \
//!       --image firma.png --llx 50 --lly 50 --urx 250 --ury 150 --page 0
//!
//! The authority is configured through SEGPRES_BASE_URL, SEGPRES_SECRET,
//! SEGPRES_API_TOKEN_KEY and optionally APP_TIMEZONE, APP_TIMEOUT and
//! APP_PRIVATE_KEY. Set RUST_LOG for logging.

use firmador::{Orchestrator, SignerConfig, SigningRequest, VisibleSignature};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Default)]
struct SignArgs {
    input: PathBuf,
    output: PathBuf,
    rut: String,
    password: Option<String>,
    attended: bool,
    image: Option<PathBuf>,
    llx: i32,
    lly: i32,
    urx: i32,
    ury: i32,
    page: i32,
}

impl SignArgs {
    fn from_args() -> Result<Self, String> {
        let args: Vec<String> = std::env::args().collect();
        let mut parsed = SignArgs::default();

        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            if flag == "--attended" {
                parsed.attended = true;
                i += 1;
                continue;
            }

            let value = args.get(i + 1).ok_or_else(|| format!("{} needs a value", flag))?;
            match flag {
                "--input" | "-i" => parsed.input = PathBuf::from(value),
                "--output" | "-o" => parsed.output = PathBuf::from(value),
                "--rut" => parsed.rut = value.clone(),
                "--password" => {
                    parsed.password = Some(value.clone());
                    parsed.attended = true;
                },
                "--image" => parsed.image = Some(PathBuf::from(value)),
                "--llx" => parsed.llx = number(flag, value)?,
                "--lly" => parsed.lly = number(flag, value)?,
                "--urx" => parsed.urx = number(flag, value)?,
                "--ury" => parsed.ury = number(flag, value)?,
                "--page" => parsed.page = number(flag, value)?,
                other => return Err(format!("unknown argument {}", other)),
            }
            i += 2;
        }

        if parsed.input.as_os_str().is_empty() || parsed.output.as_os_str().is_empty() || parsed.rut.is_empty() {
            return Err("--input, --output and --rut are required".to_string());
        }
        Ok(parsed)
    }

    fn into_request(self) -> Result<SigningRequest, String> {
        let file = fs::read(&self.input).map_err(|e| format!("reading {}: {}", self.input.display(), e))?;
        let mut request = SigningRequest::new(self.rut, file).attended(self.attended);
        request.encrypted_password = self.password;

        if let Some(path) = self.image {
            let image = fs::read(&path).map_err(|e| format!("reading {}: {}", path.display(), e))?;
            request = request.with_signature(VisibleSignature {
                image,
                llx: self.llx,
                lly: self.lly,
                urx: self.urx,
                ury: self.ury,
                page: self.page,
            });
        }
        Ok(request)
    }
}

fn number(flag: &str, value: &str) -> Result<i32, String> {
    value
        .parse()
        .map_err(|e| format!("{} expects an integer: {}", flag, e))
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match SignArgs::from_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Usage: firmador_sign --input <pdf> --output <pdf> --rut <rut> [--password <b64>] [--attended]");
            eprintln!("                     [--image <file> --llx N --lly N --urx N --ury N --page N]");
            return ExitCode::from(2);
        },
    };

    let config = match SignerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        },
    };
    let orchestrator = match Orchestrator::from_config(&config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        },
    };

    let output = args.output.clone();
    let request = match args.into_request() {
        Ok(request) => request,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        },
    };

    let reply = orchestrator.sign(&request);
    println!("success:          {}", reply.success);
    println!("invalid password: {}", reply.invalid_password);
    println!("retry:            {}", reply.retry);
    println!("message:          {}", reply.message);

    match reply.file {
        Some(file) => match fs::write(&output, file) {
            Ok(()) => {
                println!("written:          {}", output.display());
                ExitCode::SUCCESS
            },
            Err(e) => {
                eprintln!("Error writing {}: {}", output.display(), e);
                ExitCode::FAILURE
            },
        },
        None => ExitCode::FAILURE,
    }
}
