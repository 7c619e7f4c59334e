//! Streaming recovery scan of a spool log file (§4.2 Crash-safe recovery).

use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use peac_core::SpoolEntry;
use peac_error::{CorruptReason, SpoolError};

/// Result of scanning a spool file from the beginning.
pub struct ScanOutcome {
    /// All entries successfully parsed and chain-linked before any corruption.
    pub entries: Vec<SpoolEntry>,
    /// Byte offset, from the start of the file, through the last valid entry's
    /// trailing newline. Equals the file length when no corruption was found.
    pub valid_up_to_byte: u64,
    /// Set when the scan stopped early because of a corrupt or oversized
    /// line. `None` means the whole file parsed and chained cleanly.
    pub corruption: Option<ScanCorruption>,
}

/// A corruption found partway through a scan.
pub struct ScanCorruption {
    /// Classification of the corruption.
    pub reason: CorruptReason,
    /// Sequence the *next* (unreadable) entry would have occupied.
    pub at_sequence: u64,
    /// Free-form detail for diagnostics.
    pub details: String,
}

/// Scan `path` from byte 0, validating JSON parse, digest self-consistency
/// and chain linkage of every line, enforcing `max_line_bytes` along the way.
///
/// A final line with no trailing newline (an interrupted write) is always
/// classified as an incomplete tail, truncate-and-continue, never as
/// malformed JSON or chain breakage — even if its partial content happens to
/// parse. A line that *does* end in a newline but still fails to parse, or
/// fails to chain, is real corruption and ends the scan with
/// [`CorruptReason::MalformedJson`] or [`CorruptReason::ChainBroken`]. An
/// over-length line is checked first, before either of those, and applies
/// even to the trailing line.
pub fn scan_file(path: &Path, max_line_bytes: u64) -> Result<ScanOutcome, SpoolError> {
    let file = std::fs::File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut entries = Vec::new();
    let mut valid_up_to_byte: u64 = 0;
    let mut prev: Option<SpoolEntry> = None;

    loop {
        let mut raw = Vec::new();
        let read = read_line_capped(&mut reader, max_line_bytes, &mut raw)?;
        match read {
            LineRead::Eof => break,
            LineRead::TooLarge => {
                let at_sequence = prev.as_ref().map(|e| e.sequence + 1).unwrap_or(1);
                return Ok(ScanOutcome {
                    entries,
                    valid_up_to_byte,
                    corruption: Some(ScanCorruption {
                        reason: CorruptReason::LineTooLarge,
                        at_sequence,
                        details: format!("line exceeds {max_line_bytes} bytes"),
                    }),
                });
            }
            LineRead::Unterminated => {
                // Interrupted write: truncate and stop clean, not corruption.
                break;
            }
            LineRead::Line => {
                let text = match std::str::from_utf8(&raw) {
                    Ok(t) => t.trim_end_matches('\n').trim_end_matches('\r'),
                    Err(_) => {
                        let at_sequence = prev.as_ref().map(|e| e.sequence + 1).unwrap_or(1);
                        return Ok(ScanOutcome {
                            entries,
                            valid_up_to_byte,
                            corruption: Some(ScanCorruption {
                                reason: CorruptReason::MalformedJson,
                                at_sequence,
                                details: "line is not valid UTF-8".to_string(),
                            }),
                        });
                    }
                };

                let parsed: Result<SpoolEntry, _> = serde_json::from_str(text);
                let entry = match parsed {
                    Ok(e) => e,
                    Err(e) => {
                        let at_sequence = prev.as_ref().map(|e| e.sequence + 1).unwrap_or(1);
                        return Ok(ScanOutcome {
                            entries,
                            valid_up_to_byte,
                            corruption: Some(ScanCorruption {
                                reason: CorruptReason::MalformedJson,
                                at_sequence,
                                details: e.to_string(),
                            }),
                        });
                    }
                };

                let chain_ok = match &prev {
                    None => entry.is_valid_genesis(),
                    Some(p) => entry.links_after(p),
                };
                if !chain_ok || !entry.digest_is_self_consistent() {
                    return Ok(ScanOutcome {
                        entries,
                        valid_up_to_byte,
                        corruption: Some(ScanCorruption {
                            reason: CorruptReason::ChainBroken,
                            at_sequence: entry.sequence,
                            details: "entry failed chain linkage or digest self-consistency"
                                .to_string(),
                        }),
                    });
                }

                valid_up_to_byte += raw.len() as u64;
                prev = Some(entry.clone());
                entries.push(entry);
            }
        }
    }

    Ok(ScanOutcome {
        entries,
        valid_up_to_byte,
        corruption: None,
    })
}

enum LineRead {
    Line,
    Unterminated,
    TooLarge,
    Eof,
}

/// Reads one `\n`-terminated line into `buf`, enforcing `max_line_bytes`
/// before allocating further. Oversize is detected even without a
/// terminator, so a truncated-and-oversized tail is still `TooLarge`.
fn read_line_capped<R: BufRead>(
    reader: &mut R,
    max_line_bytes: u64,
    buf: &mut Vec<u8>,
) -> Result<LineRead, SpoolError> {
    let mut saw_any = false;
    loop {
        let available = match reader.fill_buf() {
            Ok(b) => b,
            Err(e) => return Err(SpoolError::Io(e)),
        };
        if available.is_empty() {
            return Ok(if saw_any {
                LineRead::Unterminated
            } else {
                LineRead::Eof
            });
        }
        saw_any = true;
        if let Some(pos) = available.iter().position(|&b| b == b'\n') {
            buf.extend_from_slice(&available[..=pos]);
            reader.consume(pos + 1);
            if buf.len() as u64 > max_line_bytes {
                return Ok(LineRead::TooLarge);
            }
            return Ok(LineRead::Line);
        } else {
            let n = available.len();
            buf.extend_from_slice(available);
            reader.consume(n);
            if buf.len() as u64 > max_line_bytes {
                // Drain the rest of this oversized line before reporting, so
                // the caller's byte accounting for subsequent scans (if any)
                // stays sane.
                let mut sink = Vec::new();
                let _ = reader.read_to_end(&mut sink);
                return Ok(LineRead::TooLarge);
            }
        }
    }
}
