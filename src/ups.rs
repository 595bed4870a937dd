use crate::poller::{ClientError, Connector, UpsClient};
use crate::variables::{Device, Value, Variable};

use std::{
    io::{BufRead, BufReader, ErrorKind, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    time::Duration,
};

use tracing::debug;

// The server speaks line based ASCII, one command per line.
const TERMINATOR: &str = "\n";

// An arbitrary cap on lines in one LIST reply, so a confused server can't hold us forever.
const MAX_LIST_LINES: usize = 4096;

pub struct NutConnector;

impl Connector for NutConnector {
    type Client = UPS;

    fn connect(
        &self,
        server: &str,
        port: u16,
        connect_timeout: Duration,
        op_timeout: Duration,
    ) -> Result<UPS, ClientError> {
        UPS::connect(server, port, connect_timeout, op_timeout)
    }
}

pub struct UPS {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl UPS {
    pub fn connect(
        server: &str,
        port: u16,
        connect_timeout: Duration,
        op_timeout: Duration,
    ) -> Result<UPS, ClientError> {
        let mut last_err = None;
        for addr in (server, port).to_socket_addrs()? {
            // A zero timeout waits as long as the OS does.
            let dialed = if connect_timeout.is_zero() {
                TcpStream::connect(addr)
            } else {
                TcpStream::connect_timeout(&addr, connect_timeout)
            };
            match dialed {
                Ok(stream) => {
                    debug!("Connected to {}.", addr);
                    return UPS::from_stream(stream, op_timeout);
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(match last_err {
            Some(e) => e.into(),
            None => std::io::Error::new(
                ErrorKind::AddrNotAvailable,
                format!("{} resolved to no addresses", server),
            )
            .into(),
        })
    }

    pub fn from_stream(stream: TcpStream, op_timeout: Duration) -> Result<UPS, ClientError> {
        let op_timeout = Some(op_timeout).filter(|t| !t.is_zero());
        stream.set_read_timeout(op_timeout)?;
        stream.set_write_timeout(op_timeout)?;
        let writer = stream.try_clone()?;
        Ok(UPS {
            reader: BufReader::new(stream),
            writer,
        })
    }

    fn send_command(&mut self, cmd: &str) -> Result<(), ClientError> {
        self.writer.write_all(cmd.as_bytes())?;
        self.writer.write_all(TERMINATOR.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    fn get_response(&mut self) -> Result<String, ClientError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(std::io::Error::from(ErrorKind::UnexpectedEof).into());
        }

        let line = line.trim_end_matches(['\r', '\n']).to_string();
        if let Some(code) = line.strip_prefix("ERR ") {
            return Err(ClientError::Server(code.to_string()));
        }
        Ok(line)
    }

    fn expect_ok(&mut self, cmd: &str) -> Result<(), ClientError> {
        self.send_command(cmd)?;
        let res = self.get_response()?;
        if res.starts_with("OK") {
            Ok(())
        } else {
            Err(ClientError::Protocol(res))
        }
    }

    // Sends `LIST <query>` and collects the words of every line between BEGIN and END.
    fn list(&mut self, query: &str) -> Result<Vec<Vec<String>>, ClientError> {
        self.send_command(&format!("LIST {}", query))?;

        let res = self.get_response()?;
        if res != format!("BEGIN LIST {}", query) {
            return Err(ClientError::Protocol(res));
        }

        let end = format!("END LIST {}", query);
        let mut out = Vec::new();
        for _ in 0..MAX_LIST_LINES {
            let res = self.get_response()?;
            if res == end {
                return Ok(out);
            }
            out.push(split_words(&res)?);
        }

        Err(ClientError::Protocol(format!("no END LIST {}", query)))
    }

    fn get_type(&mut self, ups: &str, var: &str) -> Result<Vec<String>, ClientError> {
        self.send_command(&format!("GET TYPE {} {}", ups, var))?;
        let res = self.get_response()?;
        let words = split_words(&res)?;
        match words.as_slice() {
            [kw, u, v, types @ ..] if kw == "TYPE" && u == ups && v == var => Ok(types.to_vec()),
            _ => Err(ClientError::Protocol(res)),
        }
    }

    fn get_variables(&mut self, ups: &str) -> Result<Vec<Variable>, ClientError> {
        let mut raw = Vec::new();
        for words in self.list(&format!("VAR {}", ups))? {
            match words.as_slice() {
                [kw, _, name, value] if kw == "VAR" => raw.push((name.clone(), value.clone())),
                _ => return Err(ClientError::Protocol(words.join(" "))),
            }
        }

        let mut variables = Vec::with_capacity(raw.len());
        for (name, value) in raw {
            let types = self.get_type(ups, &name)?;
            variables.push(Variable::new(&name, typed_value(&types, value)));
        }
        Ok(variables)
    }
}

impl UpsClient for UPS {
    fn authenticate(&mut self, username: &str, password: &str) -> Result<(), ClientError> {
        self.expect_ok(&format!("USERNAME {}", username))?;
        self.expect_ok(&format!("PASSWORD {}", password))
    }

    fn list_devices(&mut self) -> Result<Vec<Device>, ClientError> {
        let mut names = Vec::new();
        for words in self.list("UPS")? {
            match words.as_slice() {
                [kw, name, ..] if kw == "UPS" => names.push(name.clone()),
                _ => return Err(ClientError::Protocol(words.join(" "))),
            }
        }

        let mut devices = Vec::with_capacity(names.len());
        for name in names {
            let variables = self.get_variables(&name)?;
            devices.push(Device { name, variables });
        }
        Ok(devices)
    }

    fn disconnect(&mut self) {
        // The server answers LOGOUT with "OK Goodbye", we don't wait on it.
        if let Err(e) = self.send_command("LOGOUT") {
            debug!("LOGOUT failed: {}", e);
        }
        let _ = self.writer.shutdown(Shutdown::Both);
    }
}

// Splits a reply line on spaces, keeping quoted strings whole and
// resolving backslash escapes inside them.
fn split_words(line: &str) -> Result<Vec<String>, ClientError> {
    let mut words = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c == ' ' {
            chars.next();
            continue;
        }

        let mut word = String::new();
        if c == '"' {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some(escaped) => word.push(escaped),
                        None => return Err(ClientError::Protocol(line.to_string())),
                    },
                    Some(c) => word.push(c),
                    None => return Err(ClientError::Protocol(line.to_string())),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ' ' {
                    break;
                }
                word.push(c);
                chars.next();
            }
        }
        words.push(word);
    }

    Ok(words)
}

// NUMBER variables become integers where they fit, floats otherwise.
pub fn typed_value(types: &[String], value: String) -> Value {
    if types.iter().any(|t| t == "NUMBER") {
        if let Ok(i) = value.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(x) = value.parse::<f64>() {
            return Value::Float(x);
        }
    }
    Value::Str(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{
        net::TcpListener,
        thread::{self, JoinHandle},
    };

    const TIMEOUT: Duration = Duration::from_secs(5);

    // Serves scripted replies: for each expected command, the lines to send back.
    fn fake_upsd(script: Vec<(&'static str, Vec<&'static str>)>) -> (u16, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            let mut seen = Vec::new();

            for (expected, replies) in script {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let cmd = line.trim_end().to_string();
                assert_eq!(cmd, expected);
                seen.push(cmd);
                for reply in replies {
                    writer.write_all(format!("{}\n", reply).as_bytes()).unwrap();
                }
            }

            // Whatever comes last, normally LOGOUT.
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap_or(0) > 0 {
                seen.push(line.trim_end().to_string());
            }
            seen
        });

        (port, handle)
    }

    #[test]
    fn lists_devices_with_typed_variables() {
        let (port, server) = fake_upsd(vec![
            (
                "LIST UPS",
                vec![
                    "BEGIN LIST UPS",
                    "UPS rack \"APC Smart-UPS\"",
                    "END LIST UPS",
                ],
            ),
            (
                "LIST VAR rack",
                vec![
                    "BEGIN LIST VAR rack",
                    "VAR rack ups.status \"OL CHRG\"",
                    "VAR rack battery.runtime \"1260\"",
                    "VAR rack input.voltage \"229.5\"",
                    "VAR rack device.serial \"0042\"",
                    "END LIST VAR rack",
                ],
            ),
            ("GET TYPE rack ups.status", vec!["TYPE rack ups.status STRING:64"]),
            ("GET TYPE rack battery.runtime", vec!["TYPE rack battery.runtime NUMBER"]),
            ("GET TYPE rack input.voltage", vec!["TYPE rack input.voltage NUMBER"]),
            ("GET TYPE rack device.serial", vec!["TYPE rack device.serial STRING:32"]),
        ]);

        let mut ups = NutConnector.connect("127.0.0.1", port, TIMEOUT, TIMEOUT).unwrap();
        let devices = ups.list_devices().unwrap();
        ups.disconnect();

        assert_eq!(
            devices,
            vec![Device {
                name: "rack".to_string(),
                variables: vec![
                    Variable::new("ups.status", "OL CHRG"),
                    Variable::new("battery.runtime", 1260i64),
                    Variable::new("input.voltage", 229.5),
                    Variable::new("device.serial", "0042"),
                ],
            }]
        );
        assert_eq!(server.join().unwrap().last().unwrap(), "LOGOUT");
    }

    #[test]
    fn authenticates_then_reports_server_errors() {
        let (port, server) = fake_upsd(vec![
            ("USERNAME monuser", vec!["OK"]),
            ("PASSWORD secret", vec!["OK"]),
            ("LIST UPS", vec!["ERR ACCESS-DENIED"]),
        ]);

        let mut ups = UPS::connect("127.0.0.1", port, TIMEOUT, TIMEOUT).unwrap();
        ups.authenticate("monuser", "secret").unwrap();
        let err = ups.list_devices().unwrap_err();
        ups.disconnect();

        assert!(matches!(err, ClientError::Server(ref code) if code == "ACCESS-DENIED"));
        server.join().unwrap();
    }

    #[test]
    fn rejected_password() {
        let (port, server) = fake_upsd(vec![
            ("USERNAME monuser", vec!["OK"]),
            ("PASSWORD wrong", vec!["ERR INVALID-PASSWORD"]),
        ]);

        let mut ups = UPS::connect("127.0.0.1", port, TIMEOUT, TIMEOUT).unwrap();
        let err = ups.authenticate("monuser", "wrong").unwrap_err();
        ups.disconnect();

        assert_eq!(err.to_string(), "server replied ERR INVALID-PASSWORD");
        server.join().unwrap();
    }

    #[test]
    fn zero_timeouts_mean_no_timeout() {
        let (port, server) = fake_upsd(vec![(
            "LIST UPS",
            vec!["BEGIN LIST UPS", "END LIST UPS"],
        )]);

        let zero = Duration::from_secs(0);
        let mut ups = UPS::connect("127.0.0.1", port, zero, zero).unwrap();
        assert!(ups.list_devices().unwrap().is_empty());
        ups.disconnect();
        server.join().unwrap();
    }

    #[test]
    fn refused_connection_is_an_io_error() {
        // Grab a free port, then close it again.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let err = UPS::connect("127.0.0.1", port, TIMEOUT, TIMEOUT).err().unwrap();
        assert!(matches!(err, ClientError::Io(_)));
    }

    #[test]
    fn splits_quoted_words() {
        assert_eq!(
            split_words(r#"VAR ups ups.mfr "American \"Power\" \\ Conversion""#).unwrap(),
            vec!["VAR", "ups", "ups.mfr", r#"American "Power" \ Conversion"#]
        );
        assert_eq!(split_words("VAR ups x \"\"").unwrap(), vec!["VAR", "ups", "x", ""]);
        assert!(split_words("VAR ups x \"open").is_err());
    }

    #[test]
    fn only_numbers_are_parsed() {
        let number = vec!["NUMBER".to_string()];
        let string = vec!["RW".to_string(), "STRING:16".to_string()];

        assert_eq!(typed_value(&number, "120".to_string()), Value::Int(120));
        assert_eq!(typed_value(&number, "49.9".to_string()), Value::Float(49.9));
        assert_eq!(typed_value(&number, "n/a".to_string()), Value::from("n/a"));
        assert_eq!(typed_value(&string, "120".to_string()), Value::from("120"));
    }
}
