//! Binary AIGER reader and writer.
//!
//! The on-disk format is the binary AIGER format: an ASCII header
//! `aig M I L O A` with `M = I + L + A`, the latch and output driver
//! literals, `A` delta-encoded AND definitions, and an optional extension
//! block. The compact variant (`aig2`) delta-encodes the driver literals
//! too, in one variable-length integer stream placed before the AND block.
//!
//! Every unsigned integer in the binary sections is written low seven bits
//! first, the top bit of each byte marking continuation. An AND with
//! literal `lit = 2·(1+I+L+i)` stores `lit − lit1` and `lit1 − lit0` with
//! `lit1 > lit0`.
//!
//! After the `c` separator the file may carry extension sections, each
//! introduced by one tag byte, in this order:
//!
//! | tag | payload |
//! |-----|---------|
//! | `e` | equivalence classes, varint stream, length includes itself |
//! | `f` | flop classes, `4·R` raw bytes |
//! | `m` | LUT mapping, varint stream, length includes itself |
//! | `p` | placement, `4·nObj` raw bytes |
//! | `s` | switching activity, `nObj` bytes |
//! | `c` | constraint count, 4 bytes |
//! | `n` | NUL-terminated model name |
//!
//! The `e` and `m` section lengths count their own four length bytes; the
//! `f`, `p` and `s` lengths count the payload only. Lengths are big-endian;
//! the fixed-width payload words are little-endian. An unrecognized tag
//! ends the extension block and the remaining bytes are a free-form
//! comment, but a section that announces more bytes than the file holds is
//! rejected.

use crate::aig::{Aig, Lit, Node, Placement};
use crate::equiv::EquivClasses;
use crate::error::{Error, Result};
use crate::map::{Lut, Mapping};
use cranelift_entity::EntityRef;
use smallvec::SmallVec;
use std::io::{Read, Write};

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Cursor<'a> {
        Cursor { buf, pos: 0 }
    }

    fn byte(&mut self) -> Result<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| Error::malformed("unexpected end of file", self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn expect(&mut self, b: u8) -> Result<()> {
        let got = self.byte()?;
        if got != b {
            return Err(Error::malformed(
                format!("expected {:?}, found {:?}", b as char, got as char),
                self.pos - 1,
            ));
        }
        Ok(())
    }

    /// One unsigned integer, low seven bits first.
    fn varint(&mut self) -> Result<u32> {
        let mut x: u32 = 0;
        let mut shift = 0;
        loop {
            let ch = self.byte()?;
            let payload = (ch & 0x7f) as u32;
            if shift >= 28 && payload >= 1 << (32 - shift) {
                return Err(Error::Overflow(format!(
                    "varint does not fit 32 bits at byte {}",
                    self.pos - 1
                )));
            }
            x |= payload << shift;
            if ch & 0x80 == 0 {
                return Ok(x);
            }
            shift += 7;
            if shift > 28 {
                return Err(Error::Overflow(format!(
                    "varint does not fit 32 bits at byte {}",
                    self.pos - 1
                )));
            }
        }
    }

    /// An ASCII decimal integer followed by the delimiter.
    fn ascii_uint(&mut self, delim: u8) -> Result<u32> {
        let mut value: u64 = 0;
        let mut any = false;
        loop {
            let b = self.byte()?;
            if b == delim {
                break;
            }
            if !b.is_ascii_digit() {
                return Err(Error::malformed("expected a decimal digit", self.pos - 1));
            }
            any = true;
            value = value * 10 + (b - b'0') as u64;
            if value > u32::MAX as u64 {
                return Err(Error::Overflow(format!(
                    "decimal number too large at byte {}",
                    self.pos - 1
                )));
            }
        }
        if !any {
            return Err(Error::malformed("empty decimal number", self.pos));
        }
        Ok(value as u32)
    }

    fn be32(&mut self) -> Result<u32> {
        let mut v = 0u32;
        for _ in 0..4 {
            v = v << 8 | self.byte()? as u32;
        }
        Ok(v)
    }

    fn le32(&mut self) -> Result<u32> {
        let mut v = 0u32;
        for i in 0..4 {
            v |= (self.byte()? as u32) << (8 * i);
        }
        Ok(v)
    }

    /// A signed delta relative to `prev`, encoded as `(|d| << 1) | sign`
    /// with the sign bit set for a positive step.
    fn diff_value(&mut self, prev: u32) -> Result<u32> {
        let item = self.varint()?;
        let mag = item >> 1;
        if item & 1 != 0 {
            prev.checked_add(mag)
                .ok_or_else(|| Error::Overflow(format!("delta overflows at byte {}", self.pos)))
        } else {
            prev.checked_sub(mag).ok_or_else(|| {
                Error::malformed("delta steps below zero", self.pos)
            })
        }
    }
}

/// Decodes the compact driver-literal stream: the first literal plain, then
/// `(|diff| << 1) | (current < previous)` per literal.
fn decode_literals(c: &mut Cursor, n: usize) -> Result<Vec<u32>> {
    let mut lits = Vec::with_capacity(n);
    if n == 0 {
        return Ok(lits);
    }
    let mut prev = c.varint()?;
    lits.push(prev);
    for _ in 1..n {
        let diff = c.varint()?;
        let mag = diff >> 1;
        let lit = if diff & 1 != 0 {
            prev.checked_sub(mag)
                .ok_or_else(|| Error::malformed("literal delta below zero", c.pos))?
        } else {
            prev.checked_add(mag)
                .ok_or_else(|| Error::Overflow(format!("literal delta overflows at {}", c.pos)))?
        };
        lits.push(lit);
        prev = lit;
    }
    Ok(lits)
}

/// Reads a manager from anything readable.
pub fn read<R: Read>(r: &mut R) -> Result<Aig> {
    let mut buf = Vec::new();
    r.read_to_end(&mut buf)?;
    read_bytes(&buf)
}

/// Reads a manager from an in-memory AIGER image.
pub fn read_bytes(buf: &[u8]) -> Result<Aig> {
    let mut c = Cursor::new(buf);
    c.expect(b'a')?;
    c.expect(b'i')?;
    c.expect(b'g')?;
    let compact = match c.byte()? {
        b' ' => false,
        b'2' => {
            c.expect(b' ')?;
            true
        }
        _ => return Err(Error::malformed("unknown AIGER mode", c.pos - 1)),
    };
    let m = c.ascii_uint(b' ')?;
    let n_in = c.ascii_uint(b' ')?;
    let n_latch = c.ascii_uint(b' ')?;
    let n_out = c.ascii_uint(b' ')?;
    let n_and = c.ascii_uint(b'\n')?;
    let total = n_in as u64 + n_latch as u64 + n_and as u64;
    if m as u64 != total {
        return Err(Error::malformed(
            format!("header M = {} but I + L + A = {}", m, total),
            c.pos,
        ));
    }
    // Literal ids are 32 bits on disk, so node ids stop at 2^31.
    if total + n_out as u64 + n_latch as u64 >= 1 << 31 {
        return Err(Error::Overflow(format!(
            "{} objects do not fit 32-bit literals",
            total
        )));
    }

    let cap = (1 + m as usize + n_out as usize + n_latch as usize).min(2 * buf.len() + 64);
    let mut aig = Aig::with_capacity(cap);
    let mut lits: Vec<Lit> = Vec::with_capacity(cap);
    lits.push(Lit::CONST0);
    for _ in 0..n_in + n_latch {
        lits.push(aig.add_ci());
    }

    // Driver literals precede the AND block in both modes: as ASCII lines
    // or as one delta stream.
    let n_drivers = (n_latch + n_out) as usize;
    let drivers: Vec<u32> = if compact {
        decode_literals(&mut c, n_drivers)?
    } else {
        let mut v = Vec::with_capacity(n_drivers);
        for _ in 0..n_drivers {
            v.push(c.ascii_uint(b'\n')?);
        }
        v
    };

    let map_lit = |lits: &[Lit], l: u32, at: usize| -> Result<Lit> {
        let var = (l >> 1) as usize;
        let base = lits
            .get(var)
            .ok_or_else(|| Error::Overflow(format!("literal {} out of range at byte {}", l, at)))?;
        Ok(base.xor_complement(l & 1 != 0))
    };

    for i in 0..n_and {
        let lit = 2 * (1 + n_in + n_latch + i);
        let d1 = c.varint()?;
        let lit1 = lit
            .checked_sub(d1)
            .ok_or_else(|| Error::malformed("AND fanin delta underflows", c.pos))?;
        let d0 = c.varint()?;
        let lit0 = lit1
            .checked_sub(d0)
            .ok_or_else(|| Error::malformed("AND fanin delta underflows", c.pos))?;
        if lit1 <= lit0 || lit1 >= lit {
            return Err(Error::malformed(
                format!("AND {} has disordered fanins {} {}", lit, lit0, lit1),
                c.pos,
            ));
        }
        let f0 = map_lit(&lits, lit0, c.pos)?;
        let f1 = map_lit(&lits, lit1, c.pos)?;
        lits.push(aig.and(f0, f1));
    }

    // Outputs first, then register inputs; the register inputs are the
    // last L entries of the CO list.
    for i in 0..n_out as usize {
        let l = drivers[n_latch as usize + i];
        let d = map_lit(&lits, l, c.pos)?;
        aig.add_co(d);
    }
    for i in 0..n_latch as usize {
        let d = map_lit(&lits, drivers[i], c.pos)?;
        aig.add_co(d);
    }
    aig.set_register_count(n_latch as usize);

    if c.peek() == Some(b'c') {
        c.byte()?;
        read_extensions(&mut c, &mut aig)?;
    }
    Ok(aig)
}

fn read_extensions(c: &mut Cursor, aig: &mut Aig) -> Result<()> {
    let n_obj = aig.node_count();
    if c.peek() == Some(b'e') {
        c.byte()?;
        let section_start = c.pos;
        let len = c.be32()? as usize;
        let stop = section_start
            .checked_add(len)
            .filter(|&s| s <= c.buf.len() && s >= c.pos)
            .ok_or_else(|| Error::malformed("equivalence section truncated", c.pos))?;
        let mut eq = EquivClasses::new();
        let mut repr = 0u32;
        let mut node = 0u32;
        while c.pos < stop {
            let item = c.varint()?;
            if item & 1 != 0 {
                repr = repr
                    .checked_add(item >> 1)
                    .ok_or_else(|| Error::malformed("equivalence delta overflows", c.pos))?;
                node = repr;
                continue;
            }
            let item = item >> 1;
            let proved = item & 1 != 0;
            node = node
                .checked_add(item >> 1)
                .ok_or_else(|| Error::malformed("equivalence delta overflows", c.pos))?;
            if repr >= node || (node as usize) >= n_obj {
                return Err(Error::malformed(
                    format!("equivalence entry {} -> {} out of order", node, repr),
                    c.pos,
                ));
            }
            eq.set_repr(Node::from_u32(node), Node::from_u32(repr), false);
            if proved {
                eq.set_proved(Node::from_u32(node));
            }
        }
        if c.pos != stop {
            return Err(Error::malformed("equivalence section overruns", c.pos));
        }
        eq.derive_nexts(aig);
        aig.equivs = Some(eq);
    }
    if c.peek() == Some(b'f') {
        c.byte()?;
        let len = c.be32()? as usize;
        if len != 4 * aig.register_count() {
            return Err(Error::malformed(
                format!("flop-class section of {} bytes does not match", len),
                c.pos,
            ));
        }
        let mut classes = Vec::with_capacity(aig.register_count());
        for _ in 0..aig.register_count() {
            classes.push(c.le32()?);
        }
        aig.flop_classes = Some(classes);
    }
    if c.peek() == Some(b'm') {
        c.byte()?;
        let section_start = c.pos;
        let len = c.be32()? as usize;
        let stop = section_start
            .checked_add(len)
            .filter(|&s| s <= c.buf.len() && s >= c.pos)
            .ok_or_else(|| Error::malformed("mapping section truncated", c.pos))?;
        let mut mapping = Mapping::default();
        let mut prev = 0u32;
        while c.pos < stop {
            let n_fanins = c.varint()? as usize;
            if n_fanins > crate::cut::LEAF_MAX {
                return Err(Error::malformed(
                    format!("LUT with {} fanins", n_fanins),
                    c.pos,
                ));
            }
            let mut leaves: SmallVec<[Node; crate::cut::LEAF_MAX]> = SmallVec::new();
            for _ in 0..n_fanins {
                prev = c.diff_value(prev)?;
                if prev as usize >= n_obj {
                    return Err(Error::Overflow(format!("LUT leaf {} out of range", prev)));
                }
                leaves.push(Node::from_u32(prev));
            }
            prev = c.diff_value(prev)?;
            if prev as usize >= n_obj {
                return Err(Error::Overflow(format!("LUT root {} out of range", prev)));
            }
            mapping.luts.push(Lut {
                leaves,
                root: Node::from_u32(prev),
            });
        }
        if c.pos != stop {
            return Err(Error::malformed("mapping section overruns", c.pos));
        }
        mapping.luts.sort_by_key(|l| l.root);
        aig.mapping = Some(mapping);
    }
    if c.peek() == Some(b'p') {
        c.byte()?;
        let len = c.be32()? as usize;
        if len != 4 * n_obj {
            return Err(Error::malformed(
                format!("placement section of {} bytes does not match", len),
                c.pos,
            ));
        }
        let mut placement = Vec::with_capacity(n_obj);
        for _ in 0..n_obj {
            let w = c.le32()?;
            placement.push(Placement {
                fixed: w & 1 != 0,
                undef: w >> 1 & 1 != 0,
                x: (w >> 2 & 0x3fff) as u16,
                y: (w >> 16) as u16,
            });
        }
        aig.placement = Some(placement);
    }
    if c.peek() == Some(b's') {
        c.byte()?;
        let len = c.be32()? as usize;
        if len != n_obj {
            return Err(Error::malformed(
                format!("switching section of {} bytes does not match", len),
                c.pos,
            ));
        }
        if c.pos + len > c.buf.len() {
            return Err(Error::malformed("switching section truncated", c.pos));
        }
        aig.switching = Some(c.buf[c.pos..c.pos + len].to_vec());
        c.pos += len;
    }
    if c.peek() == Some(b'c') {
        c.byte()?;
        aig.n_constraints = c.be32()?;
    }
    if c.peek() == Some(b'n') {
        c.byte()?;
        let start = c.pos;
        loop {
            let b = c.byte()?;
            if b == 0 {
                break;
            }
        }
        aig.name = Some(String::from_utf8_lossy(&c.buf[start..c.pos - 1]).into_owned());
    }
    // Anything that remains is a comment.
    Ok(())
}

fn push_varint(out: &mut Vec<u8>, mut x: u32) {
    while x & !0x7f != 0 {
        out.push((x & 0x7f) as u8 | 0x80);
        x >>= 7;
    }
    out.push(x as u8);
}

fn push_be32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn push_le32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_diff_value(out: &mut Vec<u8>, prev: u32, this: u32) {
    if prev < this {
        push_varint(out, (this - prev) << 1 | 1);
    } else {
        push_varint(out, (prev - this) << 1);
    }
}

/// Writes a manager. `compact` selects the `aig2` literal encoding;
/// `with_extras` appends the side-car sections present on the manager.
///
/// A manager that is not in normalized node order is rebuilt first, which
/// drops its side-cars (their indices would be stale).
pub fn write<W: Write>(aig: &Aig, w: &mut W, compact: bool, with_extras: bool) -> Result<()> {
    let bytes = write_bytes(aig, compact, with_extras)?;
    w.write_all(&bytes)?;
    Ok(())
}

/// Renders a manager to an in-memory AIGER image.
pub fn write_bytes(aig: &Aig, compact: bool, with_extras: bool) -> Result<Vec<u8>> {
    if aig.co_count() == 0 {
        return Err(Error::Unsupported(
            "an AIG without outputs cannot be written".into(),
        ));
    }
    let normalized;
    let p = if aig.is_normalized() {
        aig
    } else {
        log::debug!("normalizing before writing");
        normalized = aig.clone_normalized();
        &normalized
    };

    let n_in = p.pi_count();
    let n_latch = p.register_count();
    let n_out = p.po_count();
    let n_and = p.and_count();
    let mut out = Vec::new();
    out.extend_from_slice(
        format!(
            "aig{} {} {} {} {} {}\n",
            if compact { "2" } else { "" },
            n_in + n_latch + n_and,
            n_in,
            n_latch,
            n_out,
            n_and
        )
        .as_bytes(),
    );

    // Register-input drivers first, then output drivers.
    let drivers: Vec<u32> = (0..n_latch)
        .map(|j| p.co_driver_at(n_out + j).raw())
        .chain((0..n_out).map(|i| p.co_driver_at(i).raw()))
        .collect();
    if compact {
        if let Some((&first, rest)) = drivers.split_first() {
            push_varint(&mut out, first);
            let mut prev = first;
            for &lit in rest {
                let diff = if lit < prev { prev - lit } else { lit - prev };
                push_varint(&mut out, diff << 1 | (lit < prev) as u32);
                prev = lit;
            }
        }
    } else {
        for &d in &drivers {
            out.extend_from_slice(format!("{}\n", d).as_bytes());
        }
    }

    for n in p.ands() {
        let (f0, f1) = p.and_fanins(n);
        let lit = 2 * n.index() as u32;
        let (l0, l1) = (f0.raw(), f1.raw());
        debug_assert!(l0 < l1 && l1 < lit);
        push_varint(&mut out, lit - l1);
        push_varint(&mut out, l1 - l0);
    }

    out.push(b'c');
    if with_extras {
        write_extensions(p, &mut out)?;
    }
    out.extend_from_slice(b"\nThis file was produced by the aigrette AIG package\n");
    out.extend_from_slice(b"For information about the AIGER format, see http://fmv.jku.at/aiger\n");
    Ok(out)
}

fn write_extensions(p: &Aig, out: &mut Vec<u8>) -> Result<()> {
    let n_obj = p.node_count();
    if let Some(eq) = &p.equivs {
        let mut eq = eq.clone();
        eq.derive_nexts(p);
        let mut buf = vec![0u8; 4];
        // Constant class header, then its members.
        push_varint(&mut buf, 1);
        let mut prev_node = 0u32;
        for n in p.nodes() {
            if eq.repr_of(n) == Some(Node::CONST0) {
                let delta = n.as_u32() - prev_node;
                prev_node = n.as_u32();
                push_varint(&mut buf, (delta << 1 | eq.is_proved(n) as u32) << 1);
            }
        }
        let mut prev_repr = 0u32;
        for &head in eq.heads() {
            if head == Node::CONST0 {
                continue;
            }
            push_varint(&mut buf, (head.as_u32() - prev_repr) << 1 | 1);
            prev_repr = head.as_u32();
            prev_node = head.as_u32();
            for member in eq.members(head).skip(1).collect::<Vec<_>>() {
                let delta = member.as_u32() - prev_node;
                prev_node = member.as_u32();
                push_varint(&mut buf, (delta << 1 | eq.is_proved(member) as u32) << 1);
            }
        }
        let len = buf.len() as u32;
        buf[..4].copy_from_slice(&len.to_be_bytes());
        out.push(b'e');
        out.extend_from_slice(&buf);
    }
    if let Some(classes) = &p.flop_classes {
        if classes.len() != p.register_count() {
            return Err(Error::InvariantViolation(format!(
                "{} flop classes for {} registers",
                classes.len(),
                p.register_count()
            )));
        }
        out.push(b'f');
        push_be32(out, 4 * classes.len() as u32);
        for &cl in classes {
            push_le32(out, cl);
        }
    }
    if let Some(mapping) = &p.mapping {
        let mut buf = vec![0u8; 4];
        let mut prev = 0u32;
        for lut in &mapping.luts {
            push_varint(&mut buf, lut.leaves.len() as u32);
            for &leaf in &lut.leaves {
                push_diff_value(&mut buf, prev, leaf.as_u32());
                prev = leaf.as_u32();
            }
            push_diff_value(&mut buf, prev, lut.root.as_u32());
            prev = lut.root.as_u32();
        }
        let len = buf.len() as u32;
        buf[..4].copy_from_slice(&len.to_be_bytes());
        out.push(b'm');
        out.extend_from_slice(&buf);
    }
    if let Some(placement) = &p.placement {
        if placement.len() != n_obj {
            return Err(Error::InvariantViolation(format!(
                "placement over {} objects, manager has {}",
                placement.len(),
                n_obj
            )));
        }
        out.push(b'p');
        push_be32(out, 4 * n_obj as u32);
        for plc in placement {
            let w = plc.fixed as u32
                | (plc.undef as u32) << 1
                | ((plc.x as u32) & 0x3fff) << 2
                | (plc.y as u32) << 16;
            push_le32(out, w);
        }
    }
    if let Some(switching) = &p.switching {
        if switching.len() != n_obj {
            return Err(Error::InvariantViolation(format!(
                "switching over {} objects, manager has {}",
                switching.len(),
                n_obj
            )));
        }
        out.push(b's');
        push_be32(out, n_obj as u32);
        out.extend_from_slice(switching);
    }
    if p.n_constraints != 0 {
        out.push(b'c');
        push_be32(out, p.n_constraints);
    }
    if let Some(name) = &p.name {
        out.push(b'n');
        out.extend_from_slice(name.as_bytes());
        out.push(0);
    }
    Ok(())
}
