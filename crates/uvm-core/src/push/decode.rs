//! Command-stream decoder.

use uvm_hwref::host::method as hdr;

use crate::error::{Result, UvmError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodOpcode {
    /// Address increments after every data word.
    Inc,
    /// Every data word targets the same address.
    NonInc,
    /// Address increments once, after the first data word.
    OneInc,
    /// Single 13-bit value carried in the header.
    Immediate,
    /// All-zero header with no data.
    Nop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub opcode: MethodOpcode,
    pub subchannel: u8,
    /// Byte offset of the first method.
    pub address: u32,
    pub data: Vec<u32>,
}

impl Method {
    /// Expands the method into the `(address, value)` writes the front-end performs.
    pub fn writes(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let opcode = self.opcode;
        let base = self.address;
        self.data.iter().enumerate().map(move |(i, &value)| {
            let i = i as u32;
            let address = match opcode {
                MethodOpcode::Inc => base + 4 * i,
                MethodOpcode::OneInc => base + 4 * i.min(1),
                MethodOpcode::NonInc | MethodOpcode::Immediate | MethodOpcode::Nop => base,
            };
            (address, value)
        })
    }

    /// Number of stream words this method occupies.
    pub fn word_len(&self) -> usize {
        match self.opcode {
            MethodOpcode::Immediate | MethodOpcode::Nop => 1,
            _ => 1 + self.data.len(),
        }
    }
}

pub fn decode(words: &[u32]) -> Result<Vec<Method>> {
    let mut methods = Vec::new();
    let mut i = 0;
    while i < words.len() {
        let header = words[i];
        i += 1;
        let subchannel = hdr::SUBCHANNEL.get32(header) as u8;
        let address = hdr::ADDRESS.get32(header) << 2;
        let opcode = match hdr::OPCODE.get32(header) {
            hdr::OPCODE_INC => MethodOpcode::Inc,
            hdr::OPCODE_NON_INC => MethodOpcode::NonInc,
            hdr::OPCODE_ONE_INC => MethodOpcode::OneInc,
            hdr::OPCODE_IMMEDIATE => {
                methods.push(Method {
                    opcode: MethodOpcode::Immediate,
                    subchannel,
                    address,
                    data: vec![hdr::IMMEDIATE.get32(header)],
                });
                continue;
            }
            hdr::OPCODE_NOP if header == 0 => {
                methods.push(Method {
                    opcode: MethodOpcode::Nop,
                    subchannel: 0,
                    address: 0,
                    data: Vec::new(),
                });
                continue;
            }
            other => {
                return Err(UvmError::invalid_state(format!(
                    "unsupported method opcode {other} in header {header:#010x} at word {}",
                    i - 1
                )))
            }
        };
        let count = hdr::COUNT.get32(header) as usize;
        let data = words.get(i..i + count).ok_or_else(|| {
            UvmError::invalid_state(format!(
                "method at word {} wants {count} data words, {} remain",
                i - 1,
                words.len() - i
            ))
        })?;
        i += count;
        methods.push(Method {
            opcode,
            subchannel,
            address,
            data: data.to_vec(),
        });
    }
    Ok(methods)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_each_opcode() {
        let words = [
            0x2002_0010, // INC, 2 words, subch 0, 0x40
            1,
            2,
            0x8005_8008, // IMMEDIATE 5, subch 4, 0x20
            0,           // NOP
            0xA002_0000, // ONE_INC, 2 words, 0x0
            3,
            4,
        ];
        let methods = decode(&words).unwrap();
        assert_eq!(methods.len(), 4);
        assert_eq!(methods[0].writes().collect::<Vec<_>>(), vec![(0x40, 1), (0x44, 2)]);
        assert_eq!(methods[1].opcode, MethodOpcode::Immediate);
        assert_eq!(methods[1].subchannel, 4);
        assert_eq!(methods[1].writes().collect::<Vec<_>>(), vec![(0x20, 5)]);
        assert_eq!(methods[2].opcode, MethodOpcode::Nop);
        assert_eq!(methods[3].writes().collect::<Vec<_>>(), vec![(0x0, 3), (0x4, 4)]);
        assert_eq!(methods.iter().map(Method::word_len).sum::<usize>(), words.len());
    }

    #[test]
    fn truncated_method_is_rejected() {
        let err = decode(&[0x2003_0010, 1]).unwrap_err();
        assert!(matches!(err, UvmError::InvalidState(_)));
    }
}
