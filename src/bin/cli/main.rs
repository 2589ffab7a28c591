//! rexec - interactive client for rexecd
//!
//! Connects to a daemon, sends the commands typed at the prompt and prints
//! their output. With a command after `--` it runs that single command and
//! exits.

use async_std::io::{self, BufReader, WriteExt};
use async_std::net::TcpStream;
use clap::Parser;
use rexec::protocol::{
    CLIENT_RESPONSE_LIMIT, COMMAND_CAPACITY, ERROR_PREFIX, SENTINEL, command_limit, is_terminating,
    is_truncated, read_frame, strip_truncation, write_frame,
};
use std::error::Error;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::process::ExitCode;

/// rexec client - run shell commands on a rexecd host
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IPv4 address of the daemon
    ip: Ipv4Addr,

    /// TCP port of the daemon
    port: u16,

    /// Largest response accepted, in bytes
    #[arg(long, default_value_t = CLIENT_RESPONSE_LIMIT)]
    max_response: usize,

    /// Run this command once and exit instead of starting the prompt
    #[arg(last = true)]
    command: Vec<String>,
}

/// Result of checking a typed line before sending it
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    /// Nothing to do
    Blank,
    /// Handled locally
    Help,
    Clear,
    /// Send to the daemon
    Send(&'a str),
    /// Refused before reaching the network
    Rejected(String),
}

/// Classify one line typed at the prompt
fn classify_input(line: &str) -> Input<'_> {
    let command = line.trim_end_matches(['\r', '\n']);
    let limit = command_limit(COMMAND_CAPACITY);

    match command.trim() {
        "" => Input::Blank,
        "help" | "?" => Input::Help,
        "clear" => Input::Clear,
        _ if command.len() > limit => Input::Rejected(format!(
            "command is {} bytes, the daemon accepts at most {}",
            command.len(),
            limit
        )),
        _ if command.as_bytes().contains(&SENTINEL) => {
            Input::Rejected("command contains a NUL byte".to_string())
        }
        _ => Input::Send(command),
    }
}

/// Connected session with a daemon
struct RexecShell {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    peer: SocketAddr,
    max_response: usize,
}

impl RexecShell {
    /// Connect to the daemon
    async fn connect(address: SocketAddrV4, max_response: usize) -> Result<Self, Box<dyn Error>> {
        let stream = TcpStream::connect(address).await?;
        let peer = stream.peer_addr()?;

        println!("Connected to {}", peer);
        println!("Local address {}", stream.local_addr()?);

        Ok(RexecShell {
            reader: BufReader::new(stream.clone()),
            writer: stream,
            peer,
            max_response,
        })
    }

    /// Send one command and wait for its response
    ///
    /// # Returns
    /// * `Ok(Some(payload))` - The response
    /// * `Ok(None)` - The daemon closed the connection
    async fn request(&mut self, command: &str) -> Result<Option<Vec<u8>>, Box<dyn Error>> {
        write_frame(&mut self.writer, command.as_bytes()).await?;
        Ok(read_frame(&mut self.reader, self.max_response).await?)
    }

    /// Tell the daemon the session is over
    async fn quit(&mut self) -> Result<(), Box<dyn Error>> {
        write_frame(&mut self.writer, b"quit").await?;
        Ok(())
    }

    /// Show help information
    fn show_help(&self) {
        let help_text = r#"
rexec Shell Help
================
Shell Commands:
  help            - Show this help message
  clear           - Clear the screen
  exit/quit       - End the session

Anything else is run by the remote shell; only its standard output is returned.
"#;
        println!("{}", help_text);
    }

    /// Run the main interactive command loop
    ///
    /// # Returns
    /// * `Ok(true)` - The session ended normally
    /// * `Ok(false)` - The daemon went away
    async fn run(&mut self) -> Result<bool, Box<dyn Error>> {
        println!("Use 'help' for shell commands.");
        println!("Enter a command or 'exit' to quit.");
        println!("{}", "─".repeat(80));

        let stdin = io::stdin();
        let prompt = format!("[{}@{}]> ", get_hostname(), self.peer);

        loop {
            print!("{}", prompt);
            io::stdout().flush().await?;

            let mut line = String::new();
            if stdin.read_line(&mut line).await? == 0 {
                // End of input ends the session like `quit`
                println!();
                self.quit().await?;
                return Ok(true);
            }

            let command = match classify_input(&line) {
                Input::Blank => continue,
                Input::Help => {
                    self.show_help();
                    continue;
                }
                Input::Clear => {
                    // Clear screen using ANSI escape codes
                    print!("\x1B[2J\x1B[1;1H");
                    continue;
                }
                Input::Rejected(reason) => {
                    eprintln!("Not sent: {}", reason);
                    continue;
                }
                Input::Send(command) => command,
            };

            if is_terminating(command.as_bytes()) {
                write_frame(&mut self.writer, command.as_bytes()).await?;
                return Ok(true);
            }

            match self.request(command).await? {
                Some(reply) => print_response(&reply),
                None => {
                    eprintln!("Connection closed by {}", self.peer);
                    return Ok(false);
                }
            }
        }
    }
}

/// Get the hostname of the current machine
fn get_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().to_string(),
        Err(_) => "localhost".to_string(),
    }
}

/// Print a response, sending daemon errors to stderr
fn print_response(reply: &[u8]) {
    let text = String::from_utf8_lossy(strip_truncation(reply));

    if text.starts_with(ERROR_PREFIX) {
        eprintln!("{}", text);
    } else {
        print!("{}", text);
        if !text.is_empty() && !text.ends_with('\n') {
            println!();
        }
    }

    if is_truncated(reply) {
        eprintln!("(output truncated by the daemon)");
    }
}

async fn run(args: Args) -> Result<ExitCode, Box<dyn Error>> {
    let address = SocketAddrV4::new(args.ip, args.port);
    let mut shell = RexecShell::connect(address, args.max_response).await?;

    if !args.command.is_empty() {
        let command = args.command.join(" ");
        // Local shell words like `help` go to the remote shell in this mode
        match classify_input(&command) {
            Input::Rejected(reason) => return Err(reason.into()),
            Input::Blank => return Err("nothing to run".into()),
            _ => {}
        }

        if is_terminating(command.as_bytes()) {
            shell.quit().await?;
            return Ok(ExitCode::SUCCESS);
        }

        let status = match shell.request(&command).await? {
            Some(reply) => {
                print_response(&reply);
                if reply.starts_with(ERROR_PREFIX.as_bytes()) {
                    ExitCode::FAILURE
                } else {
                    ExitCode::SUCCESS
                }
            }
            None => return Err("connection closed before the response".into()),
        };
        shell.quit().await?;
        return Ok(status);
    }

    if shell.run().await? {
        println!("Client disconnected.");
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

#[async_std::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
