// Copyright [2026] [Paygate Contributors]
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// Copyright (c) 2026 Paygate Contributors
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use ethers::types::{Address, U256};

use crate::error::{PaymentError, PaymentResult};

/// Wire format version of the serialized channel record. Bump only with a
/// coordinated migration: records written by one daemon version must decode
/// on every replica in the group.
const CHANNEL_RECORD_VERSION: u8 = 1;

/// Identifies one generation of a payment channel. The nonce increments each
/// time the channel is extended or settled on-chain, resetting off-chain
/// progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub channel_id: U256,
    pub nonce: U256,
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_id, self.nonce)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Closed,
}

impl ChannelState {
    const fn tag(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Closed => 1,
        }
    }

    fn from_tag(tag: u8) -> PaymentResult<Self> {
        match tag {
            0 => Ok(Self::Open),
            1 => Ok(Self::Closed),
            other => Err(PaymentError::internal(format!(
                "unknown channel state tag: {other}"
            ))),
        }
    }
}

/// The durable per-channel record owned by channel storage.
///
/// `authorized_amount` is the cumulative off-chain watermark; `signature` is
/// the sender's cheque signature at that watermark, absent on a
/// blockchain-fresh row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelData {
    pub nonce: U256,
    pub state: ChannelState,
    pub sender: Address,
    pub recipient: Address,
    pub group_id: U256,
    pub full_amount: U256,
    pub authorized_amount: U256,
    pub signature: Option<Vec<u8>>,
}

impl ChannelData {
    /// Deterministic byte encoding: version tag, length-prefixed big-endian
    /// integers, fixed-width addresses. Stable across daemon versions so CAS
    /// compares work between replicas running different builds.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(192);
        out.push(CHANNEL_RECORD_VERSION);
        write_u256(&mut out, self.nonce);
        out.push(self.state.tag());
        out.extend_from_slice(self.sender.as_bytes());
        out.extend_from_slice(self.recipient.as_bytes());
        write_u256(&mut out, self.group_id);
        write_u256(&mut out, self.full_amount);
        write_u256(&mut out, self.authorized_amount);
        match &self.signature {
            Some(signature) => {
                out.push(1);
                let len = signature.len().min(u16::MAX as usize) as u16;
                out.extend_from_slice(&len.to_be_bytes());
                out.extend_from_slice(&signature[..len as usize]);
            }
            None => out.push(0),
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> PaymentResult<Self> {
        let mut reader = Reader::new(bytes);
        let version = reader.u8()?;
        if version != CHANNEL_RECORD_VERSION {
            return Err(PaymentError::internal(format!(
                "unknown channel record version: {version}"
            )));
        }
        let nonce = read_u256(&mut reader)?;
        let state = ChannelState::from_tag(reader.u8()?)?;
        let sender = Address::from_slice(reader.take(20)?);
        let recipient = Address::from_slice(reader.take(20)?);
        let group_id = read_u256(&mut reader)?;
        let full_amount = read_u256(&mut reader)?;
        let authorized_amount = read_u256(&mut reader)?;
        let signature = match reader.u8()? {
            0 => None,
            1 => {
                let len = reader.u16()? as usize;
                Some(reader.take(len)?.to_vec())
            }
            other => {
                return Err(PaymentError::internal(format!(
                    "unknown signature presence tag: {other}"
                )))
            }
        };
        reader.finish()?;
        Ok(Self {
            nonce,
            state,
            sender,
            recipient,
            group_id,
            full_amount,
            authorized_amount,
            signature,
        })
    }
}

/// A payment cheque extracted from request metadata. Transient; never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub mpe_contract_address: Address,
    pub channel_id: U256,
    pub channel_nonce: U256,
    pub amount: U256,
    pub signature: Vec<u8>,
}

fn write_u256(out: &mut Vec<u8>, value: U256) {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    let skip = word.iter().take_while(|b| **b == 0).count();
    let magnitude = &word[skip..];
    out.extend_from_slice(&(magnitude.len() as u16).to_be_bytes());
    out.extend_from_slice(magnitude);
}

fn read_u256(reader: &mut Reader<'_>) -> PaymentResult<U256> {
    let len = reader.u16()? as usize;
    if len > 32 {
        return Err(PaymentError::internal(format!(
            "big integer magnitude too wide: {len} bytes"
        )));
    }
    Ok(U256::from_big_endian(reader.take(len)?))
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> PaymentResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| PaymentError::internal("truncated channel record"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> PaymentResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> PaymentResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn finish(&self) -> PaymentResult<()> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(PaymentError::internal("trailing bytes in channel record"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ChannelData, ChannelKey, ChannelState};
    use ethers::types::{Address, U256};

    fn channel() -> ChannelData {
        ChannelData {
            nonce: U256::from(3),
            state: ChannelState::Open,
            sender: Address::repeat_byte(0xAB),
            recipient: Address::repeat_byte(0xCD),
            group_id: U256::from(7),
            full_amount: U256::from(1_000_000u64),
            authorized_amount: U256::from(12_300u64),
            signature: Some(vec![0x01, 0x02, 0xFE, 0xFF]),
        }
    }

    #[test]
    fn channel_record_round_trips() {
        let data = channel();
        let decoded = ChannelData::from_bytes(&data.to_bytes()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn blockchain_fresh_record_round_trips_without_signature() {
        let data = ChannelData {
            authorized_amount: U256::zero(),
            signature: None,
            ..channel()
        };
        let decoded = ChannelData::from_bytes(&data.to_bytes()).unwrap();
        assert_eq!(decoded.signature, None);
        assert_eq!(decoded, data);
    }

    #[test]
    fn encoding_is_deterministic() {
        assert_eq!(channel().to_bytes(), channel().to_bytes());
    }

    #[test]
    fn truncated_record_is_rejected() {
        let mut bytes = channel().to_bytes();
        bytes.truncate(bytes.len() - 1);
        assert!(ChannelData::from_bytes(&bytes).is_err());
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = channel().to_bytes();
        bytes.push(0);
        assert!(ChannelData::from_bytes(&bytes).is_err());
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut bytes = channel().to_bytes();
        bytes[0] = 99;
        assert!(ChannelData::from_bytes(&bytes).is_err());
    }

    #[test]
    fn key_displays_as_id_and_nonce() {
        let key = ChannelKey {
            channel_id: U256::from(42),
            nonce: U256::from(3),
        };
        assert_eq!(key.to_string(), "42/3");
    }
}
