//! Line protocol shared by `RemoteLm` and `serve`:
//!
//! ```text
//! prob <n> w1 ... wn   ->  <log10 p(wn | w1 .. wn-1)>
//! order                ->  <model order>
//! ```
//!
//! Failures are answered with a line starting with `error`.

use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tracing::{debug, info, warn};

use crate::symbol::{SymbolId, SymbolTable};

use super::{LmBackend, LmError};

struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Connection {
    fn open(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
        })
    }

    fn request(&mut self, line: &str) -> io::Result<String> {
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        let mut reply = String::new();
        if self.reader.read_line(&mut reply)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            ));
        }
        Ok(reply.trim().to_string())
    }
}

/// Client for an LM served over TCP. Calls block; a failed call drops the
/// connection and surfaces as `LmError::Remote` without retrying.
pub struct RemoteLm {
    addr: String,
    order: usize,
    symbols: Arc<SymbolTable>,
    conn: Mutex<Option<Connection>>,
}

impl RemoteLm {
    /// Connect and ask the server for its order.
    pub fn connect(addr: &str, symbols: Arc<SymbolTable>) -> Result<Self, LmError> {
        let mut conn = Connection::open(addr).map_err(|e| LmError::Remote(format!("{addr}: {e}")))?;
        let reply = conn
            .request("order")
            .map_err(|e| LmError::Remote(format!("{addr}: {e}")))?;
        let order: usize = reply
            .parse()
            .map_err(|_| LmError::Remote(format!("{addr}: bad order reply '{reply}'")))?;
        info!(addr, order, "connected to remote language model");
        Ok(Self {
            addr: addr.to_string(),
            order,
            symbols,
            conn: Mutex::new(Some(conn)),
        })
    }

    fn request(&self, line: &str) -> Result<String, LmError> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            let conn = Connection::open(&self.addr)
                .map_err(|e| LmError::Remote(format!("{}: {e}", self.addr)))?;
            *guard = Some(conn);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(LmError::Remote(format!("{}: not connected", self.addr)));
        };
        let result = conn.request(line);
        match result {
            Ok(reply) if reply.starts_with("error") => Err(LmError::Remote(reply)),
            Ok(reply) => Ok(reply),
            Err(e) => {
                *guard = None;
                Err(LmError::Remote(format!("{}: {e}", self.addr)))
            }
        }
    }
}

impl LmBackend for RemoteLm {
    fn order(&self) -> usize {
        self.order
    }

    fn ngram_cost(&self, ngram: &[SymbolId]) -> Result<f64, LmError> {
        if ngram.is_empty() {
            return Ok(0.0);
        }
        let n = ngram.len().min(self.order);
        let words = self.symbols.render(&ngram[ngram.len() - n..])?;
        let reply = self.request(&format!("prob {n} {words}"))?;
        let logp: f64 = reply
            .parse()
            .map_err(|_| LmError::Remote(format!("bad probability reply '{reply}'")))?;
        Ok(-logp)
    }

    fn reload(&self) -> Result<(), LmError> {
        let conn =
            Connection::open(&self.addr).map_err(|e| LmError::Remote(format!("{}: {e}", self.addr)))?;
        *self.conn.lock().unwrap_or_else(PoisonError::into_inner) = Some(conn);
        debug!(addr = %self.addr, "remote language model reconnected");
        Ok(())
    }
}

/// Answer one protocol line.
pub(crate) fn answer(line: &str, lm: &dyn LmBackend, symbols: &SymbolTable) -> String {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("prob") => {
            let Some(n) = parts.next().and_then(|n| n.parse::<usize>().ok()) else {
                return "error missing n-gram length".to_string();
            };
            let words: Vec<SymbolId> = parts
                .map(|w| symbols.get(w).unwrap_or_else(|| symbols.unk()))
                .collect();
            if words.len() != n || n == 0 {
                return format!("error expected {n} words, got {}", words.len());
            }
            match lm.ngram_cost(&words) {
                Ok(cost) => format!("{}", -cost),
                Err(e) => format!("error {e}"),
            }
        }
        Some("order") => lm.order().to_string(),
        _ => "error unknown command".to_string(),
    }
}

fn handle_connection(stream: TcpStream, lm: &dyn LmBackend, symbols: &SymbolTable) -> io::Result<()> {
    let reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);
    for line in reader.lines() {
        let line = line?;
        writeln!(writer, "{}", answer(&line, lm, symbols))?;
        writer.flush()?;
    }
    Ok(())
}

/// Serve `lm` on `listener`, one thread per connection. Runs until the
/// listener fails.
pub fn serve(listener: TcpListener, lm: Arc<dyn LmBackend>, symbols: Arc<SymbolTable>) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, order = lm.order(), "language model server listening");
    for (n, stream) in listener.incoming().enumerate() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        let lm = Arc::clone(&lm);
        let symbols = Arc::clone(&symbols);
        thread::Builder::new()
            .name(format!("lm-conn-{n}"))
            .spawn(move || {
                if let Err(e) = handle_connection(stream, lm.as_ref(), &symbols) {
                    debug!(error = %e, "connection closed");
                }
            })?;
    }
    Ok(())
}
