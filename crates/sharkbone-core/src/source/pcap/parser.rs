use std::fs::File;
use std::path::Path;

use bytes::Bytes;
use pcap_parser::{
    Block, LegacyPcapReader, PcapBlockOwned, PcapNGReader, traits::PcapReaderIterator,
};

use crate::source::{Frame, PacketSource, SourceError};

use super::error::PcapSourceError;
use super::layout;
use super::reader::{
    Interface, captured_slice, interface_for, is_pcapng_magic, legacy_ts_to_seconds,
    pcapng_ts_to_seconds, read_magic_and_rewind,
};

pub struct PcapFileSource {
    inner: PcapReader,
    frames: u64,
}

enum PcapReader {
    Legacy {
        reader: LegacyPcapReader<File>,
        linktype: u32,
        nanoseconds: bool,
    },
    Ng {
        reader: PcapNGReader<File>,
        interfaces: Vec<Interface>,
    },
}

impl PcapFileSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(SourceError::from)?;
        let inner = create_reader(file).map_err(SourceError::from)?;
        Ok(Self { inner, frames: 0 })
    }
}

impl PacketSource for PcapFileSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let frame = next_frame(&mut self.inner, self.frames + 1).map_err(SourceError::from)?;
        if frame.is_some() {
            self.frames += 1;
        }
        Ok(frame)
    }
}

fn create_reader(file: File) -> Result<PcapReader, PcapSourceError> {
    let mut file = file;
    let magic = read_magic_and_rewind(&mut file)?;

    if is_pcapng_magic(&magic) {
        let reader = PcapNGReader::new(layout::PCAP_READER_BUFFER_SIZE, file).map_err(|e| {
            PcapSourceError::Pcap {
                context: "pcapng reader init",
                message: e.to_string(),
            }
        })?;
        Ok(PcapReader::Ng {
            reader,
            interfaces: Vec::new(),
        })
    } else {
        let reader = LegacyPcapReader::new(layout::PCAP_READER_BUFFER_SIZE, file).map_err(|e| {
            PcapSourceError::Pcap {
                context: "pcap reader init",
                message: e.to_string(),
            }
        })?;
        Ok(PcapReader::Legacy {
            reader,
            linktype: layout::LINKTYPE_ETHERNET,
            nanoseconds: false,
        })
    }
}

fn next_frame(reader: &mut PcapReader, number: u64) -> Result<Option<Frame>, PcapSourceError> {
    loop {
        match reader {
            PcapReader::Legacy {
                reader,
                linktype,
                nanoseconds,
            } => match reader.next() {
                Ok((offset, block)) => {
                    let frame = match block {
                        PcapBlockOwned::LegacyHeader(header) => {
                            *linktype = header.network.0 as u32;
                            *nanoseconds = header.is_nanosecond_precision();
                            None
                        }
                        PcapBlockOwned::Legacy(packet) => {
                            let data = captured_slice(packet.data, packet.caplen);
                            Some(Frame {
                                number,
                                timestamp: Some(legacy_ts_to_seconds(
                                    packet.ts_sec,
                                    packet.ts_usec,
                                    *nanoseconds,
                                )),
                                linktype: *linktype,
                                reported_length: (packet.origlen as usize).max(data.len()),
                                data: Bytes::copy_from_slice(data),
                            })
                        }
                        _ => None,
                    };
                    reader.consume(offset);
                    if frame.is_some() {
                        return Ok(frame);
                    }
                }
                Err(pcap_parser::PcapError::Eof) => return Ok(None),
                Err(pcap_parser::PcapError::Incomplete(_)) => {
                    if reader.reader_exhausted() {
                        return Err(PcapSourceError::Truncated { frame: number });
                    }
                    reader.refill().map_err(|e| PcapSourceError::Pcap {
                        context: "pcap reader refill",
                        message: e.to_string(),
                    })?;
                }
                Err(e) => {
                    return Err(PcapSourceError::Pcap {
                        context: "pcap reader next",
                        message: e.to_string(),
                    });
                }
            },
            PcapReader::Ng { reader, interfaces } => match reader.next() {
                Ok((offset, block)) => {
                    let frame = match block {
                        PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                            interfaces.clear();
                            None
                        }
                        PcapBlockOwned::NG(Block::InterfaceDescription(intf)) => {
                            interfaces.push(Interface {
                                linktype: intf.linktype.0 as u32,
                                ts_resolution: intf.if_tsresol,
                            });
                            None
                        }
                        PcapBlockOwned::NG(Block::EnhancedPacket(packet)) => {
                            let interface = interface_for(interfaces, packet.if_id);
                            let data = captured_slice(packet.data, packet.caplen);
                            Some(Frame {
                                number,
                                timestamp: Some(pcapng_ts_to_seconds(
                                    packet.ts_high,
                                    packet.ts_low,
                                    interface.ts_resolution,
                                )),
                                linktype: interface.linktype,
                                reported_length: (packet.origlen as usize).max(data.len()),
                                data: Bytes::copy_from_slice(data),
                            })
                        }
                        _ => None,
                    };
                    reader.consume(offset);
                    if frame.is_some() {
                        return Ok(frame);
                    }
                }
                Err(pcap_parser::PcapError::Eof) => return Ok(None),
                Err(pcap_parser::PcapError::Incomplete(_)) => {
                    if reader.reader_exhausted() {
                        return Err(PcapSourceError::Truncated { frame: number });
                    }
                    reader.refill().map_err(|e| PcapSourceError::Pcap {
                        context: "pcapng reader refill",
                        message: e.to_string(),
                    })?;
                }
                Err(e) => {
                    return Err(PcapSourceError::Pcap {
                        context: "pcapng reader next",
                        message: e.to_string(),
                    });
                }
            },
        }
    }
}
