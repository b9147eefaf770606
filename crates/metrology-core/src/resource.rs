//! VISA resource string parsing.
//!
//! Supported forms:
//!
//! | Interface | Example |
//! |-----------|---------|
//! | GPIB | `GPIB0::22::INSTR`, `GPIB0::22::3::INSTR` |
//! | Raw socket | `TCPIP0::192.168.1.10::5025::SOCKET` |
//! | VXI-11 / HiSLIP | `TCPIP0::192.168.1.10::INSTR`, `TCPIP0::host::inst0::INSTR` |
//! | Serial | `ASRL3::INSTR`, `ASRL/dev/ttyUSB0::INSTR` |
//! | USB-TMC | `USB0::0x0957::0x1F01::MY123::INSTR` |
//!
//! Interface keywords and resource classes are case-insensitive.

use crate::error::InstrumentError;
use std::fmt;
use std::str::FromStr;

/// A parsed VISA resource address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceAddress {
    /// GPIB instrument
    Gpib {
        /// Interface board number
        board: u16,
        /// Primary address (0-30)
        primary: u8,
        /// Optional secondary address
        secondary: Option<u8>,
    },
    /// Raw TCP socket (SCPI-RAW, usually port 5025)
    TcpSocket {
        /// Board number
        board: u16,
        /// Hostname or IP
        host: String,
        /// TCP port
        port: u16,
    },
    /// VXI-11 or HiSLIP LAN instrument, reachable only through VISA
    Lan {
        /// Board number
        board: u16,
        /// Hostname or IP
        host: String,
        /// LAN device name (`inst0`, `hislip0`, ...)
        device: Option<String>,
    },
    /// Serial port
    Serial {
        /// Either a port number (`ASRL3`) or a device path (`ASRL/dev/ttyUSB0`)
        port: SerialPortName,
    },
    /// USB-TMC instrument
    Usb {
        /// Board number
        board: u16,
        /// Vendor ID as written in the resource string
        vendor: String,
        /// Product ID as written in the resource string
        product: String,
        /// Serial number
        serial: String,
        /// Optional USB interface number
        interface: Option<u16>,
    },
}

/// Serial port designation inside an `ASRL` resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialPortName {
    /// VISA port number (`ASRL1` is the first port)
    Number(u16),
    /// Operating system device path
    Path(String),
}

impl SerialPortName {
    /// Operating system name for this port.
    ///
    /// VISA numbers ports from 1: `ASRL1` is `COM1` on Windows and
    /// `/dev/ttyS0` elsewhere.
    pub fn os_name(&self) -> String {
        match self {
            SerialPortName::Path(path) => path.clone(),
            SerialPortName::Number(n) => {
                if cfg!(windows) {
                    format!("COM{}", n)
                } else {
                    format!("/dev/ttyS{}", n.saturating_sub(1))
                }
            }
        }
    }
}

impl ResourceAddress {
    /// Parse a VISA resource string.
    pub fn parse(resource: &str) -> Result<Self, InstrumentError> {
        let invalid = |reason: &str| InstrumentError::InvalidResource {
            resource: resource.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = resource.trim().split("::").collect();
        if parts.len() < 2 {
            return Err(invalid("expected '<interface>::...::<class>'"));
        }

        let class = parts[parts.len() - 1].to_ascii_uppercase();
        let head = parts[0];
        let upper_head = head.to_ascii_uppercase();
        let fields = &parts[1..parts.len() - 1];

        if let Some(rest) = strip_keyword(&upper_head, "GPIB") {
            if class != "INSTR" {
                return Err(invalid("GPIB resources must end in ::INSTR"));
            }
            let board = parse_board(rest).ok_or_else(|| invalid("bad GPIB board number"))?;
            let (primary, secondary) = match fields {
                [p] => (parse_u8(p), None),
                [p, s] => (parse_u8(p), Some(parse_u8(s).ok_or_else(|| invalid("bad secondary address"))?)),
                _ => return Err(invalid("expected GPIB<n>::<primary>[::<secondary>]::INSTR")),
            };
            let primary = primary
                .filter(|p| *p <= 30)
                .ok_or_else(|| invalid("primary address must be 0-30"))?;
            return Ok(Self::Gpib {
                board,
                primary,
                secondary,
            });
        }

        if let Some(rest) = strip_keyword(&upper_head, "TCPIP") {
            let board = parse_board(rest).ok_or_else(|| invalid("bad TCPIP board number"))?;
            return match (class.as_str(), fields) {
                ("SOCKET", [host, port]) => {
                    let port = port
                        .parse::<u16>()
                        .map_err(|_| invalid("socket port must be a number"))?;
                    Ok(Self::TcpSocket {
                        board,
                        host: non_empty(host).ok_or_else(|| invalid("empty host"))?,
                        port,
                    })
                }
                ("INSTR", [host]) => Ok(Self::Lan {
                    board,
                    host: non_empty(host).ok_or_else(|| invalid("empty host"))?,
                    device: None,
                }),
                ("INSTR", [host, device]) => Ok(Self::Lan {
                    board,
                    host: non_empty(host).ok_or_else(|| invalid("empty host"))?,
                    device: non_empty(device),
                }),
                _ => Err(invalid(
                    "expected TCPIP<n>::<host>::<port>::SOCKET or TCPIP<n>::<host>[::<device>]::INSTR",
                )),
            };
        }

        if upper_head.starts_with("ASRL") {
            if class != "INSTR" || !fields.is_empty() {
                return Err(invalid("expected ASRL<port>::INSTR"));
            }
            let rest = &head[4..];
            if rest.is_empty() {
                return Err(invalid("missing serial port"));
            }
            let port = match rest.parse::<u16>() {
                Ok(n) if n > 0 => SerialPortName::Number(n),
                Ok(_) => return Err(invalid("serial port numbers start at 1")),
                Err(_) => SerialPortName::Path(rest.to_string()),
            };
            return Ok(Self::Serial { port });
        }

        if let Some(rest) = strip_keyword(&upper_head, "USB") {
            if class != "INSTR" {
                return Err(invalid("USB resources must end in ::INSTR"));
            }
            let board = parse_board(rest).ok_or_else(|| invalid("bad USB board number"))?;
            let (vendor, product, serial, interface) = match fields {
                [v, p, s] => (v, p, s, None),
                [v, p, s, i] => (
                    v,
                    p,
                    s,
                    Some(i.parse::<u16>().map_err(|_| invalid("bad USB interface number"))?),
                ),
                _ => return Err(invalid("expected USB<n>::<vid>::<pid>::<serial>[::<iface>]::INSTR")),
            };
            return Ok(Self::Usb {
                board,
                vendor: vendor.to_string(),
                product: product.to_string(),
                serial: serial.to_string(),
                interface,
            });
        }

        Err(invalid("unsupported interface"))
    }

    /// Whether this resource can only be opened through a VISA library.
    pub fn requires_visa(&self) -> bool {
        matches!(self, Self::Gpib { .. } | Self::Lan { .. } | Self::Usb { .. })
    }
}

impl FromStr for ResourceAddress {
    type Err = InstrumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpib {
                board,
                primary,
                secondary: None,
            } => write!(f, "GPIB{}::{}::INSTR", board, primary),
            Self::Gpib {
                board,
                primary,
                secondary: Some(s),
            } => write!(f, "GPIB{}::{}::{}::INSTR", board, primary, s),
            Self::TcpSocket { board, host, port } => {
                write!(f, "TCPIP{}::{}::{}::SOCKET", board, host, port)
            }
            Self::Lan {
                board,
                host,
                device: None,
            } => write!(f, "TCPIP{}::{}::INSTR", board, host),
            Self::Lan {
                board,
                host,
                device: Some(d),
            } => write!(f, "TCPIP{}::{}::{}::INSTR", board, host, d),
            Self::Serial {
                port: SerialPortName::Number(n),
            } => write!(f, "ASRL{}::INSTR", n),
            Self::Serial {
                port: SerialPortName::Path(p),
            } => write!(f, "ASRL{}::INSTR", p),
            Self::Usb {
                board,
                vendor,
                product,
                serial,
                interface,
            } => {
                write!(f, "USB{}::{}::{}::{}", board, vendor, product, serial)?;
                if let Some(i) = interface {
                    write!(f, "::{}", i)?;
                }
                write!(f, "::INSTR")
            }
        }
    }
}

fn strip_keyword<'a>(head: &'a str, keyword: &str) -> Option<&'a str> {
    head.strip_prefix(keyword)
}

/// Board numbers may be omitted (`GPIB::22::INSTR` is board 0).
fn parse_board(rest: &str) -> Option<u16> {
    if rest.is_empty() {
        Some(0)
    } else {
        rest.parse().ok()
    }
}

fn parse_u8(s: &str) -> Option<u8> {
    s.trim().parse().ok()
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
