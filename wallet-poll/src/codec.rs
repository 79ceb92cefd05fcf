//! Dynamic contract ABI codec.
//!
//! Types are parsed once from their canonical strings (`uint256`, `(address,bytes)[]`, ...)
//! and drive both directions of the head/tail encoding. Values are carried as [`AbiValue`],
//! so decoded results can be inspected without runtime casts.

use std::fmt;

use alloy_primitives::{keccak256, Address, Bytes, I256, U256};

use crate::error::{PollError, Result};

const WORD: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AbiType {
    Address,
    Bool,
    Uint(usize),
    Int(usize),
    FixedBytes(usize),
    Bytes,
    String,
    Array(Box<AbiType>),
    FixedArray(Box<AbiType>, usize),
    Tuple(Vec<AbiType>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Address(Address),
    Bool(bool),
    Uint(U256),
    Int(I256),
    FixedBytes(Vec<u8>),
    Bytes(Vec<u8>),
    String(String),
    Array(Vec<AbiValue>),
    FixedArray(Vec<AbiValue>),
    Tuple(Vec<AbiValue>),
}

impl AbiType {
    /// Parses a canonical type string. Unknown tags fail with `AbiUnsupportedType`.
    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        if s.is_empty() {
            return Err(PollError::unsupported_type(input));
        }

        if let Some(stripped) = s.strip_suffix(']') {
            let open = stripped
                .rfind('[')
                .ok_or_else(|| PollError::unsupported_type(input))?;
            let inner = AbiType::parse(&stripped[..open])?;
            let size = stripped[open + 1..].trim();
            if size.is_empty() {
                return Ok(AbiType::Array(Box::new(inner)));
            }
            let len = size
                .parse::<usize>()
                .ok()
                .filter(|len| *len > 0)
                .ok_or_else(|| PollError::unsupported_type(input))?;
            return Ok(AbiType::FixedArray(Box::new(inner), len));
        }

        if s.starts_with('(') {
            let inner = s
                .strip_prefix('(')
                .and_then(|v| v.strip_suffix(')'))
                .ok_or_else(|| PollError::unsupported_type(input))?;
            let members = split_top_level(inner)?
                .into_iter()
                .map(AbiType::parse)
                .collect::<Result<Vec<_>>>()?;
            if members.is_empty() {
                return Err(PollError::unsupported_type(input));
            }
            return Ok(AbiType::Tuple(members));
        }

        match s {
            "address" => return Ok(AbiType::Address),
            "bool" => return Ok(AbiType::Bool),
            "string" => return Ok(AbiType::String),
            "bytes" => return Ok(AbiType::Bytes),
            "uint" => return Ok(AbiType::Uint(256)),
            "int" => return Ok(AbiType::Int(256)),
            _ => {}
        }

        if let Some(bits) = s.strip_prefix("uint") {
            return parse_int_bits(bits, input).map(AbiType::Uint);
        }
        if let Some(bits) = s.strip_prefix("int") {
            return parse_int_bits(bits, input).map(AbiType::Int);
        }
        if let Some(size) = s.strip_prefix("bytes") {
            let size = size
                .parse::<usize>()
                .map_err(|_| PollError::unsupported_type(input))?;
            if (1..=32).contains(&size) {
                return Ok(AbiType::FixedBytes(size));
            }
        }

        Err(PollError::unsupported_type(input))
    }

    pub fn is_dynamic(&self) -> bool {
        match self {
            AbiType::Bytes | AbiType::String | AbiType::Array(_) => true,
            AbiType::FixedArray(inner, _) => inner.is_dynamic(),
            AbiType::Tuple(members) => members.iter().any(AbiType::is_dynamic),
            _ => false,
        }
    }

    /// Bytes this type occupies in the head region of its enclosing block.
    /// Saturates, so an absurd `T[k]` fails the bounds check instead of wrapping.
    fn head_size(&self) -> usize {
        if self.is_dynamic() {
            return WORD;
        }
        match self {
            AbiType::FixedArray(inner, len) => inner.head_size().saturating_mul(*len),
            AbiType::Tuple(members) => members
                .iter()
                .fold(0usize, |acc, member| acc.saturating_add(member.head_size())),
            _ => WORD,
        }
    }
}

impl fmt::Display for AbiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiType::Address => f.write_str("address"),
            AbiType::Bool => f.write_str("bool"),
            AbiType::Uint(bits) => write!(f, "uint{bits}"),
            AbiType::Int(bits) => write!(f, "int{bits}"),
            AbiType::FixedBytes(size) => write!(f, "bytes{size}"),
            AbiType::Bytes => f.write_str("bytes"),
            AbiType::String => f.write_str("string"),
            AbiType::Array(inner) => write!(f, "{inner}[]"),
            AbiType::FixedArray(inner, len) => write!(f, "{inner}[{len}]"),
            AbiType::Tuple(members) => {
                f.write_str("(")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{member}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl AbiValue {
    pub fn as_address(&self) -> Option<Address> {
        match self {
            AbiValue::Address(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<U256> {
        match self {
            AbiValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<I256> {
        match self {
            AbiValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AbiValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            AbiValue::Bytes(v) | AbiValue::FixedBytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AbiValue::String(v) => Some(v),
            _ => None,
        }
    }

    /// Elements of a dynamic array, fixed array or tuple.
    pub fn as_slice(&self) -> Option<&[AbiValue]> {
        match self {
            AbiValue::Array(v) | AbiValue::FixedArray(v) | AbiValue::Tuple(v) => Some(v),
            _ => None,
        }
    }
}

/// A parsed function signature with its declared outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub inputs: Vec<AbiType>,
    pub outputs: Vec<AbiType>,
    selector: [u8; 4],
}

impl Function {
    /// Accepts `name(type [name], ...)` optionally followed by modifiers and
    /// `returns (type, ...)`. A leading `function` keyword is ignored.
    pub fn parse(signature: &str) -> Result<Self> {
        let s = signature.trim();
        let s = s.strip_prefix("function ").unwrap_or(s).trim();

        let open = s
            .find('(')
            .ok_or_else(|| PollError::invalid_params(format!("Missing '(' in {signature}")))?;
        let name = s[..open].trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(PollError::invalid_params(format!(
                "Invalid function name in {signature}"
            )));
        }

        let close = matching_paren(s, open)
            .ok_or_else(|| PollError::invalid_params(format!("Unbalanced '(' in {signature}")))?;
        let inputs = parse_params(&s[open + 1..close])?;

        let rest = &s[close + 1..];
        let outputs = match rest.find("returns") {
            Some(pos) => {
                let after = rest[pos + "returns".len()..].trim_start();
                if !after.starts_with('(') {
                    return Err(PollError::invalid_params(format!(
                        "Missing return list in {signature}"
                    )));
                }
                let end = matching_paren(after, 0).ok_or_else(|| {
                    PollError::invalid_params(format!("Unbalanced returns in {signature}"))
                })?;
                parse_params(&after[1..end])?
            }
            None => Vec::new(),
        };

        let mut function = Self {
            name: name.to_string(),
            inputs,
            outputs,
            selector: [0u8; 4],
        };
        function.selector = selector_of(&function.signature());
        Ok(function)
    }

    /// Canonical form, e.g. `transfer(address,uint256)`.
    pub fn signature(&self) -> String {
        let params = self
            .inputs
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(",");
        format!("{}({params})", self.name)
    }

    pub fn selector(&self) -> [u8; 4] {
        self.selector
    }

    pub fn encode_input(&self, args: &[AbiValue]) -> Result<Bytes> {
        encode_call(self.selector, args, &self.inputs)
    }

    pub fn decode_input(&self, calldata: &[u8]) -> Result<Vec<AbiValue>> {
        let (selector, body) = split_selector(calldata)?;
        if selector != self.selector {
            return Err(PollError::decode(format!(
                "Selector mismatch for {}: 0x{}",
                self.name,
                hex::encode(selector)
            )));
        }
        decode_return(&self.inputs, body)
    }

    pub fn decode_output(&self, data: &[u8]) -> Result<Vec<AbiValue>> {
        decode_return(&self.outputs, data)
    }

    pub fn encode_output(&self, values: &[AbiValue]) -> Result<Vec<u8>> {
        encode_params(&self.outputs, values)
    }
}

/// First four bytes of the keccak-256 hash of the canonical signature.
/// Parameter names and whitespace are stripped before hashing.
pub fn encode_function_selector(signature: &str) -> Result<[u8; 4]> {
    Function::parse(signature).map(|f| f.selector())
}

pub fn encode_call(selector: [u8; 4], values: &[AbiValue], types: &[AbiType]) -> Result<Bytes> {
    let body = encode_params(types, values)?;
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&selector);
    out.extend_from_slice(&body);
    Ok(Bytes::from(out))
}

/// Head/tail encodes `values` as one argument block (no selector).
pub fn encode_params(types: &[AbiType], values: &[AbiValue]) -> Result<Vec<u8>> {
    encode_sequence(types, values)
}

pub fn decode_return(types: &[AbiType], data: &[u8]) -> Result<Vec<AbiValue>> {
    decode_sequence(types, data)
}

pub fn split_selector(calldata: &[u8]) -> Result<([u8; 4], &[u8])> {
    if calldata.len() < 4 {
        return Err(PollError::decode(format!(
            "Calldata too short for selector: {} bytes",
            calldata.len()
        )));
    }
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&calldata[..4]);
    Ok((selector, &calldata[4..]))
}

fn selector_of(canonical: &str) -> [u8; 4] {
    let hash = keccak256(canonical.as_bytes());
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&hash[..4]);
    selector
}

fn parse_int_bits(bits: &str, input: &str) -> Result<usize> {
    let bits = bits
        .parse::<usize>()
        .map_err(|_| PollError::unsupported_type(input))?;
    if bits == 0 || bits > 256 || bits % 8 != 0 {
        return Err(PollError::unsupported_type(input));
    }
    Ok(bits)
}

fn parse_params(list: &str) -> Result<Vec<AbiType>> {
    split_top_level(list)?
        .into_iter()
        .map(|param| AbiType::parse(param_type(param)))
        .collect()
}

/// Strips the parameter name and data-location keywords, keeping only the type.
fn param_type(param: &str) -> &str {
    let param = param.trim();
    if param.starts_with('(') {
        let Some(close) = matching_paren(param, 0) else {
            return param;
        };
        let mut end = close + 1;
        let bytes = param.as_bytes();
        while end < bytes.len() && bytes[end] == b'[' {
            match param[end..].find(']') {
                Some(rel) => end += rel + 1,
                None => break,
            }
        }
        return &param[..end];
    }
    param.split_whitespace().next().unwrap_or(param)
}

fn split_top_level(list: &str) -> Result<Vec<&str>> {
    if list.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in list.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => {
                depth -= 1;
                if depth < 0 {
                    return Err(PollError::unsupported_type(list));
                }
            }
            ',' if depth == 0 => {
                parts.push(list[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(PollError::unsupported_type(list));
    }
    parts.push(list[start..].trim());
    Ok(parts)
}

fn matching_paren(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (i, c) in s[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn mismatch(ty: &AbiType, value: &AbiValue) -> PollError {
    PollError::encode(format!("Value {value:?} does not match type {ty}"))
}

fn usize_word(value: usize) -> [u8; WORD] {
    U256::from(value).to_be_bytes::<WORD>()
}

fn fits_uint(value: U256, bits: usize) -> bool {
    bits >= 256 || (value >> bits) == U256::ZERO
}

fn fits_int(raw: U256, bits: usize) -> bool {
    if bits >= 256 {
        return true;
    }
    let high = raw >> (bits - 1);
    high == U256::ZERO || high == (U256::MAX >> (bits - 1))
}

fn encode_sequence(types: &[AbiType], values: &[AbiValue]) -> Result<Vec<u8>> {
    if types.len() != values.len() {
        return Err(PollError::encode(format!(
            "Expected {} values, got {}",
            types.len(),
            values.len()
        )));
    }

    let head_len: usize = types.iter().map(AbiType::head_size).sum();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for (ty, value) in types.iter().zip(values) {
        if ty.is_dynamic() {
            head.extend_from_slice(&usize_word(head_len + tail.len()));
            encode_tail(ty, value, &mut tail)?;
        } else {
            encode_static(ty, value, &mut head)?;
        }
    }

    head.extend_from_slice(&tail);
    Ok(head)
}

fn encode_static(ty: &AbiType, value: &AbiValue, out: &mut Vec<u8>) -> Result<()> {
    match (ty, value) {
        (AbiType::Address, AbiValue::Address(address)) => {
            out.extend_from_slice(&[0u8; 12]);
            out.extend_from_slice(address.as_slice());
        }
        (AbiType::Bool, AbiValue::Bool(flag)) => {
            out.extend_from_slice(&usize_word(usize::from(*flag)));
        }
        (AbiType::Uint(bits), AbiValue::Uint(v)) => {
            if !fits_uint(*v, *bits) {
                return Err(PollError::encode(format!("{v} overflows uint{bits}")));
            }
            out.extend_from_slice(&v.to_be_bytes::<WORD>());
        }
        (AbiType::Int(bits), AbiValue::Int(v)) => {
            let raw = v.into_raw();
            if !fits_int(raw, *bits) {
                return Err(PollError::encode(format!("{v} overflows int{bits}")));
            }
            out.extend_from_slice(&raw.to_be_bytes::<WORD>());
        }
        (AbiType::FixedBytes(size), AbiValue::FixedBytes(bytes)) => {
            if bytes.len() != *size {
                return Err(PollError::encode(format!(
                    "bytes{size} given {} bytes",
                    bytes.len()
                )));
            }
            let mut word = [0u8; WORD];
            word[..*size].copy_from_slice(bytes);
            out.extend_from_slice(&word);
        }
        (AbiType::FixedArray(inner, len), AbiValue::FixedArray(items)) => {
            if items.len() != *len {
                return Err(mismatch(ty, value));
            }
            for item in items {
                encode_static(inner, item, out)?;
            }
        }
        (AbiType::Tuple(members), AbiValue::Tuple(items)) => {
            if items.len() != members.len() {
                return Err(mismatch(ty, value));
            }
            for (member, item) in members.iter().zip(items) {
                encode_static(member, item, out)?;
            }
        }
        _ => return Err(mismatch(ty, value)),
    }
    Ok(())
}

fn encode_tail(ty: &AbiType, value: &AbiValue, out: &mut Vec<u8>) -> Result<()> {
    match (ty, value) {
        (AbiType::Bytes, AbiValue::Bytes(bytes)) => encode_packed(bytes, out),
        (AbiType::String, AbiValue::String(s)) => encode_packed(s.as_bytes(), out),
        (AbiType::Array(inner), AbiValue::Array(items)) => {
            out.extend_from_slice(&usize_word(items.len()));
            let types = vec![(**inner).clone(); items.len()];
            out.extend_from_slice(&encode_sequence(&types, items)?);
        }
        (AbiType::FixedArray(inner, len), AbiValue::FixedArray(items)) => {
            if items.len() != *len {
                return Err(mismatch(ty, value));
            }
            let types = vec![(**inner).clone(); *len];
            out.extend_from_slice(&encode_sequence(&types, items)?);
        }
        (AbiType::Tuple(members), AbiValue::Tuple(items)) => {
            out.extend_from_slice(&encode_sequence(members, items)?);
        }
        _ => return Err(mismatch(ty, value)),
    }
    Ok(())
}

fn encode_packed(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&usize_word(bytes.len()));
    out.extend_from_slice(bytes);
    let rem = bytes.len() % WORD;
    if rem != 0 {
        out.extend(std::iter::repeat(0u8).take(WORD - rem));
    }
}

fn read_word(block: &[u8], at: usize) -> Result<&[u8]> {
    at.checked_add(WORD)
        .and_then(|end| block.get(at..end))
        .ok_or_else(|| {
            PollError::decode(format!(
                "Need 32 bytes at offset {at}, have {}",
                block.len()
            ))
        })
}

fn ensure_room(block: &[u8], at: usize, needed: usize, ty: &AbiType) -> Result<()> {
    if at.checked_add(needed).is_some_and(|end| end <= block.len()) {
        Ok(())
    } else {
        Err(PollError::decode(format!(
            "{ty} needs {needed} bytes at offset {at}, have {}",
            block.len()
        )))
    }
}

fn read_usize(block: &[u8], at: usize) -> Result<usize> {
    let value = U256::from_be_slice(read_word(block, at)?);
    let limbs = value.as_limbs();
    if limbs[1..].iter().any(|limb| *limb != 0) {
        return Err(PollError::decode(format!("Length/offset too large: {value}")));
    }
    usize::try_from(limbs[0])
        .map_err(|_| PollError::decode(format!("Length/offset too large: {value}")))
}

fn decode_sequence(types: &[AbiType], block: &[u8]) -> Result<Vec<AbiValue>> {
    let mut out = Vec::with_capacity(types.len());
    let mut cursor = 0usize;

    for ty in types {
        if ty.is_dynamic() {
            let offset = read_usize(block, cursor)?;
            let tail = block.get(offset..).ok_or_else(|| {
                PollError::decode(format!(
                    "Offset {offset} out of bounds for {ty} ({} bytes)",
                    block.len()
                ))
            })?;
            out.push(decode_tail(ty, tail)?);
            cursor += WORD;
        } else {
            out.push(decode_static(ty, block, cursor)?);
            cursor += ty.head_size();
        }
    }

    Ok(out)
}

fn decode_static(ty: &AbiType, block: &[u8], at: usize) -> Result<AbiValue> {
    match ty {
        AbiType::Address => {
            let word = read_word(block, at)?;
            if word[..12].iter().any(|b| *b != 0) {
                return Err(PollError::decode("Address word has dirty padding"));
            }
            Ok(AbiValue::Address(Address::from_slice(&word[12..])))
        }
        AbiType::Bool => {
            let value = U256::from_be_slice(read_word(block, at)?);
            if value == U256::ZERO {
                Ok(AbiValue::Bool(false))
            } else if value == U256::from(1u8) {
                Ok(AbiValue::Bool(true))
            } else {
                Err(PollError::decode(format!("Invalid bool word: {value}")))
            }
        }
        AbiType::Uint(bits) => {
            let value = U256::from_be_slice(read_word(block, at)?);
            if !fits_uint(value, *bits) {
                return Err(PollError::decode(format!("{value} overflows uint{bits}")));
            }
            Ok(AbiValue::Uint(value))
        }
        AbiType::Int(bits) => {
            let raw = U256::from_be_slice(read_word(block, at)?);
            if !fits_int(raw, *bits) {
                return Err(PollError::decode(format!("Word overflows int{bits}")));
            }
            Ok(AbiValue::Int(I256::from_raw(raw)))
        }
        AbiType::FixedBytes(size) => {
            let word = read_word(block, at)?;
            if word[*size..].iter().any(|b| *b != 0) {
                return Err(PollError::decode(format!("bytes{size} has dirty padding")));
            }
            Ok(AbiValue::FixedBytes(word[..*size].to_vec()))
        }
        AbiType::FixedArray(inner, len) => {
            ensure_room(block, at, ty.head_size(), ty)?;
            let mut items = Vec::with_capacity(*len);
            let mut pos = at;
            for _ in 0..*len {
                items.push(decode_static(inner, block, pos)?);
                pos += inner.head_size();
            }
            Ok(AbiValue::FixedArray(items))
        }
        AbiType::Tuple(members) => {
            let mut items = Vec::with_capacity(members.len());
            let mut pos = at;
            for member in members {
                items.push(decode_static(member, block, pos)?);
                pos += member.head_size();
            }
            Ok(AbiValue::Tuple(items))
        }
        AbiType::Bytes | AbiType::String | AbiType::Array(_) => Err(PollError::decode(format!(
            "Dynamic type {ty} in static position"
        ))),
    }
}

fn decode_tail(ty: &AbiType, tail: &[u8]) -> Result<AbiValue> {
    match ty {
        AbiType::Bytes => Ok(AbiValue::Bytes(read_packed(tail)?.to_vec())),
        AbiType::String => {
            let raw = read_packed(tail)?;
            String::from_utf8(raw.to_vec())
                .map(AbiValue::String)
                .map_err(|err| PollError::decode(format!("Invalid utf-8 string: {err}")))
        }
        AbiType::Array(inner) => {
            let len = read_usize(tail, 0)?;
            let body = &tail[WORD..];
            // Every element takes at least one head word.
            let fits = len <= body.len() / WORD
                && len
                    .checked_mul(inner.head_size())
                    .is_some_and(|needed| needed <= body.len());
            if !fits {
                return Err(PollError::decode(format!(
                    "Array of {len} {inner} exceeds {} bytes",
                    body.len()
                )));
            }
            let types = vec![(**inner).clone(); len];
            decode_sequence(&types, body).map(AbiValue::Array)
        }
        AbiType::FixedArray(inner, len) => {
            ensure_room(tail, 0, len.saturating_mul(WORD), ty)?;
            let types = vec![(**inner).clone(); *len];
            decode_sequence(&types, tail).map(AbiValue::FixedArray)
        }
        AbiType::Tuple(members) => decode_sequence(members, tail).map(AbiValue::Tuple),
        _ => decode_static(ty, tail, 0),
    }
}

fn read_packed(tail: &[u8]) -> Result<&[u8]> {
    let len = read_usize(tail, 0)?;
    WORD.checked_add(len)
        .and_then(|end| tail.get(WORD..end))
        .ok_or_else(|| {
            PollError::decode(format!(
                "Declared length {len} exceeds {} bytes",
                tail.len().saturating_sub(WORD)
            ))
        })
}
