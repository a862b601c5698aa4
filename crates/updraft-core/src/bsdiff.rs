//! Binary-diff codec in the bsdiff4 container format.
//!
//! A patch is a 32-byte header (`BSDIFF40` magic, then control length, diff
//! length and reconstructed size as 8-byte sign-magnitude little-endian
//! integers) followed by three bzip2 blocks: a control stream of 24-byte
//! `(copy_n, extra_n, seek_delta)` triples, a byte-wise difference stream and
//! an extra stream. Both directions are implemented here; applying a patch
//! needs no native dependency.

use crate::error::{CoreError, Result};
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use std::io::{Read, Write};

const MAGIC: &[u8; 8] = b"BSDIFF40";
const HEADER_LEN: usize = 32;
const CONTROL_LEN: usize = 24;

/// Reconstruct the target from `old` and a patch blob.
///
/// Every malformed input maps to [`CoreError::PatchCorrupt`]; the caller is
/// expected to treat that as "abandon the patch chain", not as fatal.
pub fn patch(old: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    if patch.len() < HEADER_LEN {
        return Err(CoreError::PatchCorrupt("patch shorter than header"));
    }
    if &patch[..8] != MAGIC {
        return Err(CoreError::PatchCorrupt("bad magic"));
    }
    let ctrl_len = decode_off(&patch[8..16]);
    let diff_len = decode_off(&patch[16..24]);
    let new_size = decode_off(&patch[24..32]);
    if ctrl_len < 0 || diff_len < 0 || new_size < 0 {
        return Err(CoreError::PatchCorrupt("negative block length"));
    }
    let (ctrl_len, diff_len, new_size) = (ctrl_len as usize, diff_len as usize, new_size as usize);
    let diff_start = HEADER_LEN + ctrl_len;
    let extra_start = diff_start + diff_len;
    if extra_start > patch.len() {
        return Err(CoreError::PatchCorrupt("truncated block streams"));
    }

    let ctrl = decompress(&patch[HEADER_LEN..diff_start])?;
    let diff = decompress(&patch[diff_start..extra_start])?;
    let extra = decompress(&patch[extra_start..])?;
    if ctrl.len() % CONTROL_LEN != 0 {
        return Err(CoreError::PatchCorrupt("ragged control stream"));
    }

    let mut result = Vec::with_capacity(new_size);
    let mut old_pos: i64 = 0;
    let mut diff_pos = 0usize;
    let mut extra_pos = 0usize;

    for triple in ctrl.chunks_exact(CONTROL_LEN) {
        let copy_n = decode_off(&triple[..8]);
        let extra_n = decode_off(&triple[8..16]);
        let seek = decode_off(&triple[16..24]);
        if copy_n < 0 || extra_n < 0 {
            return Err(CoreError::PatchCorrupt("negative control count"));
        }
        let (copy_n, extra_n) = (copy_n as usize, extra_n as usize);

        if diff_pos + copy_n > diff.len() {
            return Err(CoreError::PatchCorrupt("diff stream underrun"));
        }
        if copy_n > 0 && (old_pos < 0 || old_pos as usize + copy_n > old.len()) {
            return Err(CoreError::PatchCorrupt("source underrun"));
        }
        for i in 0..copy_n {
            let source = old[old_pos as usize + i];
            result.push(diff[diff_pos + i].wrapping_add(source));
        }
        diff_pos += copy_n;
        old_pos += copy_n as i64;

        if extra_pos + extra_n > extra.len() {
            return Err(CoreError::PatchCorrupt("extra stream underrun"));
        }
        result.extend_from_slice(&extra[extra_pos..extra_pos + extra_n]);
        extra_pos += extra_n;

        old_pos += seek;
    }

    if result.len() != new_size {
        return Err(CoreError::PatchCorrupt("reconstructed size mismatch"));
    }
    Ok(result)
}

/// Produce a patch blob transforming `old` into `new`.
pub fn diff(old: &[u8], new: &[u8]) -> Result<Vec<u8>> {
    let sa = suffix_array(old);

    let mut ctrl = Vec::new();
    let mut diff_block = Vec::new();
    let mut extra_block = Vec::new();

    let old_size = old.len();
    let new_size = new.len();

    let mut scan = 0usize;
    let mut len = 0usize;
    let mut pos = 0usize;
    let mut last_scan = 0usize;
    let mut last_pos = 0usize;
    let mut last_offset: i64 = 0;

    while scan < new_size {
        let mut old_score: i64 = 0;
        scan += len;
        let mut scsc = scan;

        while scan < new_size {
            let found = search(&sa, old, &new[scan..]);
            len = found.0;
            pos = found.1;

            while scsc < scan + len {
                let idx = scsc as i64 + last_offset;
                if idx >= 0 && (idx as usize) < old_size && old[idx as usize] == new[scsc] {
                    old_score += 1;
                }
                scsc += 1;
            }

            if (len as i64 == old_score && len != 0) || (len as i64) > old_score + 8 {
                break;
            }

            let idx = scan as i64 + last_offset;
            if idx >= 0 && (idx as usize) < old_size && old[idx as usize] == new[scan] {
                old_score -= 1;
            }
            scan += 1;
        }

        if len as i64 != old_score || scan == new_size {
            // Extend the previous match region forward over near-equal bytes.
            let mut s = 0i64;
            let mut best_f = 0i64;
            let mut len_f = 0usize;
            let mut i = 0usize;
            while last_scan + i < scan && last_pos + i < old_size {
                if old[last_pos + i] == new[last_scan + i] {
                    s += 1;
                }
                i += 1;
                if s * 2 - i as i64 > best_f * 2 - len_f as i64 {
                    best_f = s;
                    len_f = i;
                }
            }

            // And the new match region backward.
            let mut len_b = 0usize;
            if scan < new_size {
                let mut s = 0i64;
                let mut best_b = 0i64;
                let mut i = 1usize;
                while scan >= last_scan + i && pos >= i {
                    if old[pos - i] == new[scan - i] {
                        s += 1;
                    }
                    if s * 2 - i as i64 > best_b * 2 - len_b as i64 {
                        best_b = s;
                        len_b = i;
                    }
                    i += 1;
                }
            }

            // The two extensions may overlap; pick the best split point.
            if last_scan + len_f > scan - len_b {
                let overlap = (last_scan + len_f) - (scan - len_b);
                let mut s = 0i64;
                let mut best_s = 0i64;
                let mut len_s = 0usize;
                for i in 0..overlap {
                    if new[last_scan + len_f - overlap + i] == old[last_pos + len_f - overlap + i] {
                        s += 1;
                    }
                    if new[scan - len_b + i] == old[pos - len_b + i] {
                        s -= 1;
                    }
                    if s > best_s {
                        best_s = s;
                        len_s = i + 1;
                    }
                }
                len_f = len_f + len_s - overlap;
                len_b -= len_s;
            }

            for i in 0..len_f {
                diff_block.push(new[last_scan + i].wrapping_sub(old[last_pos + i]));
            }
            let extra_n = (scan - len_b) - (last_scan + len_f);
            extra_block.extend_from_slice(&new[last_scan + len_f..last_scan + len_f + extra_n]);

            let seek = (pos as i64 - len_b as i64) - (last_pos as i64 + len_f as i64);
            push_off(&mut ctrl, len_f as i64);
            push_off(&mut ctrl, extra_n as i64);
            push_off(&mut ctrl, seek);

            last_scan = scan - len_b;
            last_pos = pos - len_b;
            last_offset = pos as i64 - scan as i64;
        }
    }

    let ctrl_z = compress(&ctrl)?;
    let diff_z = compress(&diff_block)?;
    let extra_z = compress(&extra_block)?;

    let mut out = Vec::with_capacity(HEADER_LEN + ctrl_z.len() + diff_z.len() + extra_z.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&encode_off(ctrl_z.len() as i64));
    out.extend_from_slice(&encode_off(diff_z.len() as i64));
    out.extend_from_slice(&encode_off(new_size as i64));
    out.extend_from_slice(&ctrl_z);
    out.extend_from_slice(&diff_z);
    out.extend_from_slice(&extra_z);
    Ok(out)
}

/// Suffix order over `old`; longest-match lookups binary-search this.
fn suffix_array(old: &[u8]) -> Vec<usize> {
    let mut sa: Vec<usize> = (0..old.len()).collect();
    sa.sort_unstable_by(|&a, &b| old[a..].cmp(&old[b..]));
    sa
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Longest match of a prefix of `target` inside `old`, as `(length, position)`.
fn search(sa: &[usize], old: &[u8], target: &[u8]) -> (usize, usize) {
    if sa.is_empty() || target.is_empty() {
        return (0, 0);
    }
    let mut st = 0usize;
    let mut en = sa.len() - 1;
    while en - st >= 2 {
        let mid = st + (en - st) / 2;
        let suffix = &old[sa[mid]..];
        let n = suffix.len().min(target.len());
        if suffix[..n] < target[..n] {
            st = mid;
        } else {
            en = mid;
        }
    }
    let lx = common_prefix(&old[sa[st]..], target);
    let ly = common_prefix(&old[sa[en]..], target);
    if lx > ly {
        (lx, sa[st])
    } else {
        (ly, sa[en])
    }
}

/// 8-byte sign-magnitude little-endian, high bit of the last byte as sign.
fn encode_off(x: i64) -> [u8; 8] {
    let mut buf = (x.unsigned_abs()).to_le_bytes();
    if x < 0 {
        buf[7] |= 0x80;
    }
    buf
}

fn decode_off(buf: &[u8]) -> i64 {
    let mut y = (buf[7] & 0x7f) as i64;
    for i in (0..7).rev() {
        y = y * 256 + buf[i] as i64;
    }
    if buf[7] & 0x80 != 0 {
        -y
    } else {
        y
    }
}

fn push_off(out: &mut Vec<u8>, x: i64) {
    out.extend_from_slice(&encode_off(x));
}

fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    BzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|_| CoreError::PatchCorrupt("bad bzip2 block"))?;
    Ok(out)
}
