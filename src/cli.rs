use clap::{Args, Parser, Subcommand};
use printd_lib::Viewport;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "printd")]
#[command(
    version,
    about = "printd - HTML and URL to PDF conversion over a pool of headless Chromium renderers",
    long_about = "printd\n\nModes:\n- serve: run the HTTP service (POST /convert, GET /health).\n- render: convert one HTML file or URL to PDF.\n- fetch: print the fully-loaded markup of a URL.\n\nUse --help on any subcommand for details."
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Enable verbose (debug) logging")]
    pub verbose: bool,

    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Optional config file (TOML); environment variables and CLI flags override it"
    )]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP conversion service
    Serve(ServeArgs),

    /// Convert a single HTML file or URL to PDF
    Render {
        #[command(flatten)]
        input: RenderInput,

        #[arg(
            long,
            value_name = "PATH",
            help = "JSON file with render options (format, margin, css, waitForSelector, ...)"
        )]
        options: Option<PathBuf>,

        #[arg(
            long,
            value_name = "WxH[@SCALE]",
            help = "Viewport dimensions, overriding width/height/scale from --options (e.g., 1200x1600@2)"
        )]
        viewport: Option<Viewport>,

        #[arg(long, short, value_name = "PATH", help = "Where to write the PDF")]
        output: PathBuf,
    },

    /// Print the fully-loaded markup of a URL
    Fetch {
        #[arg(long, help = "Address to load (http or https)")]
        url: String,

        #[arg(long, short, value_name = "PATH", help = "Write markup here instead of stdout")]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Default)]
pub struct ServeArgs {
    #[arg(long, help = "Interface to bind")]
    pub host: Option<String>,

    #[arg(long, help = "Port to bind")]
    pub port: Option<u16>,

    #[arg(long, value_name = "N", help = "Renderers kept warm")]
    pub pool_min: Option<usize>,

    #[arg(long, value_name = "N", help = "Upper bound on renderer processes")]
    pub pool_max: Option<usize>,

    #[arg(
        long,
        value_name = "MS",
        help = "How long a queued request waits for a renderer (0 waits indefinitely)"
    )]
    pub acquire_timeout_ms: Option<u64>,

    #[arg(long, value_name = "N", help = "Queued requests allowed before rejecting")]
    pub max_waiting_clients: Option<usize>,

    #[arg(long, value_name = "PATH", help = "Chromium executable")]
    pub browser_path: Option<PathBuf>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct RenderInput {
    #[arg(long, value_name = "PATH", help = "HTML file to render")]
    pub html_file: Option<PathBuf>,

    #[arg(long, help = "Address to render (http or https)")]
    pub url: Option<String>,
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::{Cli, Commands};
    use clap::Parser;

    #[test]
    fn serve_command_uses_defaults() {
        let cli = Cli::parse_from(["printd", "serve"]);

        assert!(!cli.verbose);
        assert!(cli.config.is_none());

        match cli.command {
            Commands::Serve(args) => {
                assert!(args.host.is_none());
                assert!(args.port.is_none());
                assert!(args.pool_min.is_none());
                assert!(args.pool_max.is_none());
                assert!(args.acquire_timeout_ms.is_none());
                assert!(args.max_waiting_clients.is_none());
                assert!(args.browser_path.is_none());
            }
            _ => panic!("expected serve command"),
        }
    }

    #[test]
    fn serve_command_respects_overrides() {
        let cli = Cli::parse_from([
            "printd",
            "serve",
            "--host",
            "0.0.0.0",
            "--port",
            "8080",
            "--pool-min",
            "0",
            "--pool-max",
            "8",
            "--acquire-timeout-ms",
            "1500",
            "--max-waiting-clients",
            "3",
            "--browser-path",
            "/usr/bin/chromium",
            "--config",
            "printd.toml",
            "--verbose",
        ]);

        assert!(cli.verbose);
        assert_eq!(
            cli.config.as_deref().and_then(|p| p.to_str()),
            Some("printd.toml")
        );
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.host.as_deref(), Some("0.0.0.0"));
                assert_eq!(args.port, Some(8080));
                assert_eq!(args.pool_min, Some(0));
                assert_eq!(args.pool_max, Some(8));
                assert_eq!(args.acquire_timeout_ms, Some(1500));
                assert_eq!(args.max_waiting_clients, Some(3));
                assert_eq!(
                    args.browser_path.as_deref().and_then(|p| p.to_str()),
                    Some("/usr/bin/chromium")
                );
            }
            _ => panic!("expected serve command"),
        }
    }

    #[test]
    fn render_accepts_exactly_one_input() {
        let cli = Cli::parse_from([
            "printd",
            "render",
            "--html-file",
            "invoice.html",
            "--output",
            "invoice.pdf",
        ]);
        match cli.command {
            Commands::Render {
                input,
                options,
                viewport,
                output,
            } => {
                assert!(input.html_file.is_some());
                assert!(input.url.is_none());
                assert!(options.is_none());
                assert!(viewport.is_none());
                assert_eq!(output.to_str(), Some("invoice.pdf"));
            }
            _ => panic!("expected render command"),
        }

        let both = Cli::try_parse_from([
            "printd",
            "render",
            "--html-file",
            "a.html",
            "--url",
            "https://example.com",
            "--output",
            "a.pdf",
        ]);
        assert!(both.is_err());

        let neither = Cli::try_parse_from(["printd", "render", "--output", "a.pdf"]);
        assert!(neither.is_err());
    }

    #[test]
    fn render_parses_viewport_with_scale() {
        let cli = Cli::parse_from([
            "printd",
            "render",
            "--url",
            "https://example.com",
            "--viewport",
            "800x600@2",
            "--output",
            "a.pdf",
        ]);
        match cli.command {
            Commands::Render { viewport, .. } => {
                let viewport = viewport.expect("viewport");
                assert_eq!((viewport.width, viewport.height), (800, 600));
                assert!((viewport.device_scale_factor - 2.0).abs() < f64::EPSILON);
            }
            _ => panic!("expected render command"),
        }

        let zero = Cli::try_parse_from([
            "printd",
            "render",
            "--url",
            "https://example.com",
            "--viewport",
            "0x600",
            "--output",
            "a.pdf",
        ]);
        assert!(zero.is_err());
    }

    #[test]
    fn fetch_output_is_optional() {
        let cli = Cli::parse_from(["printd", "fetch", "--url", "https://example.com"]);
        match cli.command {
            Commands::Fetch { url, output } => {
                assert_eq!(url, "https://example.com");
                assert!(output.is_none());
            }
            _ => panic!("expected fetch command"),
        }
    }
}
