//! Command Execution
//!
//! Takes a parsed request (a list of byte strings), runs it against the
//! store, and streams one response frame into the outgoing buffer. Commands
//! are matched on name and arity together; a known name with the wrong
//! number of arguments is as unknown as a misspelled one.
//!
//! ## Commands
//!
//! | Command                              | Reply                          |
//! |--------------------------------------|--------------------------------|
//! | `get key`                            | string or nil                  |
//! | `set key value`                      | nil                            |
//! | `del key`                            | int 1/0                        |
//! | `keys`                               | array of strings               |
//! | `zadd key score name`                | int 1 added / 0 updated        |
//! | `zrem key name`                      | int 1/0                        |
//! | `zscore key name`                    | double or nil                  |
//! | `zquery key score name offset limit` | array of (name, score) pairs   |
//! | `zqueryr key score name offset limit`| same, walking backward         |
//! | `zcount key lo_s lo_n hi_s hi_n`     | int                            |
//! | `zrank key name`                     | int or nil                     |
//! | `pexpire key ttl_ms`                 | int 1/0                        |
//! | `pttl key`                           | int ms, -1 no TTL, -2 missing  |
//!
//! Reads against a sorted-set key that does not exist see an empty set;
//! writes create it. A key holding the other value type is an error, not a
//! miss.

use bytes::Bytes;
use ordered_float::NotNan;

use crate::buffer::ByteBuf;
use crate::protocol::types::{ErrorCode, ReplyWriter};
use crate::protocol::{HEADER_SIZE, MAX_MSG};
use crate::storage::{Store, WrongType, ZSet};

/// Executes one request and appends a complete response frame to `out`.
///
/// The frame header is written first as a placeholder and patched once the
/// payload size is known. A payload that would exceed the frame limit is
/// discarded and replaced with an error reply.
pub fn handle_request(store: &mut Store, now_ms: u64, cmd: &[Bytes], out: &mut ByteBuf) {
    let header = out.len();
    out.append(&0u32.to_le_bytes());

    dispatch(store, now_ms, cmd, out);

    let mut payload = out.len() - header - HEADER_SIZE;
    if payload > MAX_MSG {
        out.truncate(header + HEADER_SIZE);
        let mut writer = ReplyWriter::new(out);
        writer.err(ErrorCode::TooBig, "response is too big");
        payload = out.len() - header - HEADER_SIZE;
    }
    out.patch_u32(header, payload as u32);
}

fn dispatch(store: &mut Store, now_ms: u64, cmd: &[Bytes], out: &mut ByteBuf) {
    let name: &[u8] = cmd.first().map(|arg| arg.as_ref()).unwrap_or(b"");
    let mut writer = ReplyWriter::new(out);
    match (name, cmd.len()) {
        (b"get", 2) => do_get(store, cmd, &mut writer),
        (b"set", 3) => do_set(store, cmd, &mut writer),
        (b"del", 2) => do_del(store, cmd, &mut writer),
        (b"keys", 1) => do_keys(store, &mut writer),
        (b"zadd", 4) => do_zadd(store, cmd, &mut writer),
        (b"zrem", 3) => do_zrem(store, cmd, &mut writer),
        (b"zscore", 3) => do_zscore(store, cmd, &mut writer),
        (b"zquery", 6) => do_zquery(store, cmd, &mut writer),
        (b"zqueryr", 6) => do_zqueryr(store, cmd, &mut writer),
        (b"zcount", 6) => do_zcount(store, cmd, &mut writer),
        (b"zrank", 3) => do_zrank(store, cmd, &mut writer),
        (b"pexpire", 3) => do_pexpire(store, now_ms, cmd, &mut writer),
        (b"pttl", 2) => do_pttl(store, now_ms, cmd, &mut writer),
        _ => writer.err(ErrorCode::Unknown, "unknown command."),
    }
}

/// Full-string float parse; rejects NaN so the sorted-set ordering stays
/// total.
fn parse_score(arg: &[u8]) -> Option<NotNan<f64>> {
    let text = std::str::from_utf8(arg).ok()?;
    let value: f64 = text.parse().ok()?;
    NotNan::new(value).ok()
}

fn parse_int(arg: &[u8]) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

fn do_get(store: &mut Store, cmd: &[Bytes], writer: &mut ReplyWriter) {
    match store.get(&cmd[1]) {
        Ok(Some(value)) => writer.str(&value),
        Ok(None) => writer.nil(),
        Err(WrongType) => writer.err(ErrorCode::BadType, "not a string value"),
    }
}

fn do_set(store: &mut Store, cmd: &[Bytes], writer: &mut ReplyWriter) {
    match store.set(cmd[1].clone(), cmd[2].clone()) {
        Ok(()) => writer.nil(),
        Err(WrongType) => writer.err(ErrorCode::BadType, "a non-string value exists"),
    }
}

fn do_del(store: &mut Store, cmd: &[Bytes], writer: &mut ReplyWriter) {
    writer.int(i64::from(store.del(&cmd[1])));
}

fn do_keys(store: &mut Store, writer: &mut ReplyWriter) {
    writer.arr(store.len() as u32);
    for key in store.keys() {
        writer.str(key);
    }
}

fn do_zadd(store: &mut Store, cmd: &[Bytes], writer: &mut ReplyWriter) {
    let Some(score) = parse_score(&cmd[2]) else {
        return writer.err(ErrorCode::BadArg, "expect float");
    };
    match store.zadd(cmd[1].clone(), score, &cmd[3]) {
        Ok(added) => writer.int(i64::from(added)),
        Err(WrongType) => writer.err(ErrorCode::BadType, "expect zset"),
    }
}

fn do_zrem(store: &mut Store, cmd: &[Bytes], writer: &mut ReplyWriter) {
    let zset = match store.zset_mut(&cmd[1]) {
        Ok(Some(zset)) => zset,
        Ok(None) => return writer.int(0),
        Err(WrongType) => return writer.err(ErrorCode::BadType, "expect zset"),
    };
    match zset.lookup(&cmd[2]) {
        Some(id) => {
            zset.remove(id);
            writer.int(1)
        }
        None => writer.int(0),
    }
}

fn do_zscore(store: &mut Store, cmd: &[Bytes], writer: &mut ReplyWriter) {
    let zset = match store.zset_mut(&cmd[1]) {
        Ok(Some(zset)) => zset,
        Ok(None) => return writer.nil(),
        Err(WrongType) => return writer.err(ErrorCode::BadType, "expect zset"),
    };
    match zset.lookup(&cmd[2]) {
        Some(id) => writer.dbl(zset.node(id).score.into_inner()),
        None => writer.nil(),
    }
}

/// Shared shape of `zquery` and `zqueryr`: seek to a bound, move by the
/// offset, then emit up to `limit` reply elements walking in `step`
/// direction (two elements per member: name, then score).
fn emit_range(zset: &ZSet, start: Option<usize>, limit: i64, step: i64, writer: &mut ReplyWriter) {
    let handle = writer.begin_arr();
    let mut n: i64 = 0;
    let mut cur = start;
    while let Some(id) = cur {
        if n >= limit {
            break;
        }
        let node = zset.node(id);
        writer.str(&node.name);
        writer.dbl(node.score.into_inner());
        cur = zset.offset(id, step);
        n += 2;
    }
    writer.end_arr(handle, n as u32);
}

fn do_zquery(store: &mut Store, cmd: &[Bytes], writer: &mut ReplyWriter) {
    let Some(score) = parse_score(&cmd[2]) else {
        return writer.err(ErrorCode::BadArg, "expect fp number");
    };
    let name = &cmd[3];
    let (Some(offset), Some(limit)) = (parse_int(&cmd[4]), parse_int(&cmd[5])) else {
        return writer.err(ErrorCode::BadArg, "expect int");
    };
    let zset = match store.zset(&cmd[1]) {
        Ok(Some(zset)) => zset,
        Ok(None) => return writer.arr(0),
        Err(WrongType) => return writer.err(ErrorCode::BadType, "expect zset"),
    };
    if limit <= 0 {
        return writer.arr(0);
    }
    let start = zset
        .seekge(score, name)
        .and_then(|id| zset.offset(id, offset));
    emit_range(zset, start, limit, 1, writer);
}

fn do_zqueryr(store: &mut Store, cmd: &[Bytes], writer: &mut ReplyWriter) {
    let Some(score) = parse_score(&cmd[2]) else {
        return writer.err(ErrorCode::BadArg, "expect fp number");
    };
    let name = &cmd[3];
    let (Some(offset), Some(limit)) = (parse_int(&cmd[4]), parse_int(&cmd[5])) else {
        return writer.err(ErrorCode::BadArg, "expect int");
    };
    let zset = match store.zset(&cmd[1]) {
        Ok(Some(zset)) => zset,
        Ok(None) => return writer.arr(0),
        Err(WrongType) => return writer.err(ErrorCode::BadType, "expect zset"),
    };
    if limit <= 0 {
        return writer.arr(0);
    }
    let start = zset
        .seekle(score, name)
        .and_then(|id| zset.offset(id, -offset));
    emit_range(zset, start, limit, -1, writer);
}

fn do_zcount(store: &mut Store, cmd: &[Bytes], writer: &mut ReplyWriter) {
    let Some(lo_score) = parse_score(&cmd[2]) else {
        return writer.err(ErrorCode::BadArg, "expect float");
    };
    let Some(hi_score) = parse_score(&cmd[4]) else {
        return writer.err(ErrorCode::BadArg, "expect float");
    };
    let zset = match store.zset(&cmd[1]) {
        Ok(Some(zset)) => zset,
        Ok(None) => return writer.int(0),
        Err(WrongType) => return writer.err(ErrorCode::BadType, "expect zset"),
    };
    writer.int(zset.count(lo_score, &cmd[3], hi_score, &cmd[5]));
}

fn do_zrank(store: &mut Store, cmd: &[Bytes], writer: &mut ReplyWriter) {
    let zset = match store.zset_mut(&cmd[1]) {
        Ok(Some(zset)) => zset,
        Ok(None) => return writer.nil(),
        Err(WrongType) => return writer.err(ErrorCode::BadType, "expect zset"),
    };
    match zset.lookup(&cmd[2]) {
        Some(id) => writer.int(zset.rank(id)),
        None => writer.nil(),
    }
}

fn do_pexpire(store: &mut Store, now_ms: u64, cmd: &[Bytes], writer: &mut ReplyWriter) {
    let Some(ttl_ms) = parse_int(&cmd[2]) else {
        return writer.err(ErrorCode::BadArg, "expect int64");
    };
    writer.int(i64::from(store.pexpire(&cmd[1], ttl_ms, now_ms)));
}

fn do_pttl(store: &mut Store, now_ms: u64, cmd: &[Bytes], writer: &mut ReplyWriter) {
    writer.int(store.pttl(&cmd[1], now_ms));
}
