//! AArch64 assembly emission from Mach.
//!
//! Prints text the host `as` accepts. The two platform dialects differ in
//! symbol decoration (`_main` vs `main`), relocation spelling
//! (`@PAGE`/`@PAGEOFF` vs `:lo12:`), local-label prefix and section
//! names; everything else is shared.
//!
//! The emitter materialises the prologue and epilogue from the Mach
//! function's frame size and uses `x16`/`x17` as expansion scratch
//! (constant materialisation, global addresses, jump tables) — the
//! register allocator never hands out either.

use charcoal_codegen::ir::ltl::Callee;
use charcoal_codegen::ir::mach::{Function, Inst, Label, Program};
use charcoal_codegen::ir::op::{Addressing, Condition, Extension, Operation, ShiftOp};
use charcoal_codegen::ir::types::{Chunk, Comparison, Type};
use charcoal_codegen::ir::Builtin;
use charcoal_codegen::isa::arm64::Mreg;
use charcoal_codegen::isa::RegClass;
use charcoal_codegen::symbols::Symbol;
use std::fmt::Write;

/// Platform-dependent emission flavour.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    /// Mach-O (macOS).
    MachO,
    /// ELF (Linux and friends).
    Elf,
}

impl Dialect {
    /// Pick the dialect for a target triple.
    pub fn for_triple(triple: &target_lexicon::Triple) -> Dialect {
        match triple.binary_format {
            target_lexicon::BinaryFormat::Macho => Dialect::MachO,
            _ => Dialect::Elf,
        }
    }

    fn sym(&self, s: Symbol) -> String {
        match self {
            Dialect::MachO => format!("_{}", s),
            Dialect::Elf => format!("{}", s),
        }
    }

    fn local(&self, prefix: &str) -> String {
        match self {
            Dialect::MachO => format!("L{}", prefix),
            Dialect::Elf => format!(".L{}", prefix),
        }
    }

    fn rodata(&self) -> &'static str {
        match self {
            Dialect::MachO => "\t.section __TEXT,__const",
            Dialect::Elf => "\t.section .rodata",
        }
    }
}

/// Emit a whole program as assembly text.
pub fn emit_program(prog: &Program, dialect: Dialect) -> String {
    let mut e = Emitter {
        out: String::new(),
        dialect,
        fn_index: 0,
        jumptables: 0,
    };
    for (i, (name, func)) in prog.functions.iter().enumerate() {
        e.fn_index = i;
        e.function(*name, func);
    }
    e.data(prog);
    e.out
}

struct Emitter {
    out: String,
    dialect: Dialect,
    fn_index: usize,
    jumptables: usize,
}

/// 32-bit name of an integer register.
fn w(r: Mreg) -> String {
    format!("w{}", r.index())
}

/// 64-bit name of an integer register.
fn x(r: Mreg) -> String {
    format!("x{}", r.index())
}

/// 32-bit name of a float register.
fn s(r: Mreg) -> String {
    format!("s{}", r.index() - Mreg::D0.index())
}

/// 64-bit name of a float register.
fn d(r: Mreg) -> String {
    format!("d{}", r.index() - Mreg::D0.index())
}

/// Register name for a value of type `ty`.
fn reg(r: Mreg, ty: Type) -> String {
    match ty {
        Type::I32 => w(r),
        Type::I64 => x(r),
        Type::F32 => s(r),
        Type::F64 => d(r),
    }
}

fn int_cond(c: Comparison, unsigned: bool) -> &'static str {
    match (c, unsigned) {
        (Comparison::Eq, _) => "eq",
        (Comparison::Ne, _) => "ne",
        (Comparison::Lt, false) => "lt",
        (Comparison::Le, false) => "le",
        (Comparison::Gt, false) => "gt",
        (Comparison::Ge, false) => "ge",
        (Comparison::Lt, true) => "lo",
        (Comparison::Le, true) => "ls",
        (Comparison::Gt, true) => "hi",
        (Comparison::Ge, true) => "hs",
    }
}

fn float_cond(c: Comparison) -> &'static str {
    match c {
        Comparison::Eq => "eq",
        Comparison::Ne => "ne",
        Comparison::Lt => "mi",
        Comparison::Le => "ls",
        Comparison::Gt => "gt",
        Comparison::Ge => "ge",
    }
}

/// The inverse of a float condition code, for the negated forms.
fn float_cond_neg(c: Comparison) -> &'static str {
    match c {
        Comparison::Eq => "ne",
        Comparison::Ne => "eq",
        Comparison::Lt => "pl",
        Comparison::Le => "hi",
        Comparison::Gt => "le",
        Comparison::Ge => "lt",
    }
}

impl Emitter {
    fn line(&mut self, text: &str) {
        self.out.push('\t');
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn label_name(&self, l: Label) -> String {
        self.dialect.local(&format!("{}_{}", self.fn_index, l.as_u32()))
    }

    /// Materialise an arbitrary 64-bit constant into an integer register.
    fn mov_imm(&mut self, dst: &str, value: u64) {
        if value == 0 {
            self.line(&format!("mov {}, #0", dst));
            return;
        }
        // movz for the lowest nonzero 16-bit chunk, movk for the rest.
        let mut first = true;
        for shift in (0..4).map(|i| i * 16) {
            let chunk = (value >> shift) & 0xffff;
            if chunk == 0 {
                continue;
            }
            let mnemonic = if first { "movz" } else { "movk" };
            first = false;
            if shift == 0 {
                self.line(&format!("{} {}, #{}", mnemonic, dst, chunk));
            } else {
                self.line(&format!("{} {}, #{}, lsl #{}", mnemonic, dst, chunk, shift));
            }
        }
    }

    /// `[sp, #ofs]`, or the address through the scratch register when the
    /// offset might not fit the immediate form. The window is the
    /// intersection of the scaled ranges of every access width.
    fn addr_sp(&mut self, ofs: i64) -> String {
        if (0..=255).contains(&ofs) || (ofs % 8 == 0 && (0..=4095).contains(&ofs)) {
            format!("[sp, #{}]", ofs)
        } else {
            self.mov_imm("x16", ofs as u64);
            self.line("add x16, x16, sp");
            "[x16]".to_string()
        }
    }

    fn global_addr(&mut self, dst: &str, sym: Symbol, ofs: i64) {
        let name = self.dialect.sym(sym);
        match self.dialect {
            Dialect::MachO => {
                self.line(&format!("adrp {}, {}@PAGE", dst, name));
                self.line(&format!("add {}, {}, {}@PAGEOFF", dst, dst, name));
            }
            Dialect::Elf => {
                self.line(&format!("adrp {}, {}", dst, name));
                self.line(&format!("add {}, {}, :lo12:{}", dst, dst, name));
            }
        }
        if ofs != 0 {
            self.mov_imm("x17", ofs as u64);
            self.line(&format!("add {}, {}, x17", dst, dst));
        }
    }

    /// The assembly operand for a memory access.
    fn amode(&mut self, mode: &Addressing, args: &[Mreg]) -> String {
        match mode {
            Addressing::Aindexed(0) => format!("[{}]", x(args[0])),
            Addressing::Aindexed(ofs) => {
                if (-256..=255).contains(ofs) || (*ofs >= 0 && *ofs % 8 == 0 && *ofs <= 4095)
                {
                    format!("[{}, #{}]", x(args[0]), ofs)
                } else {
                    self.mov_imm("x16", *ofs as u64);
                    self.line(&format!("add x16, x16, {}", x(args[0])));
                    "[x16]".to_string()
                }
            }
            Addressing::Aindexed2 => format!("[{}, {}]", x(args[0]), x(args[1])),
            Addressing::Aindexed2shift(s) => {
                format!("[{}, {}, lsl #{}]", x(args[0]), x(args[1]), s)
            }
            Addressing::Aindexed2ext(ext, sh) => {
                let ext = match ext {
                    Extension::Sxtw => "sxtw",
                    Extension::Uxtw => "uxtw",
                };
                if *sh == 0 {
                    format!("[{}, {}, {}]", x(args[0]), w(args[1]), ext)
                } else {
                    format!("[{}, {}, {} #{}]", x(args[0]), w(args[1]), ext, sh)
                }
            }
            Addressing::Aglobal(sym, ofs) => {
                self.global_addr("x16", *sym, *ofs);
                "[x16]".to_string()
            }
            Addressing::Ainstack(ofs) => self.addr_sp(*ofs),
        }
    }

    fn load(&mut self, chunk: Chunk, mode: &Addressing, args: &[Mreg], dest: Mreg) {
        let addr = self.amode(mode, args);
        let insn = match chunk {
            Chunk::Int8Signed => format!("ldrsb {}, {}", w(dest), addr),
            Chunk::Int8Unsigned => format!("ldrb {}, {}", w(dest), addr),
            Chunk::Int16Signed => format!("ldrsh {}, {}", w(dest), addr),
            Chunk::Int16Unsigned => format!("ldrh {}, {}", w(dest), addr),
            Chunk::Int32 => format!("ldr {}, {}", w(dest), addr),
            Chunk::Int64 => format!("ldr {}, {}", x(dest), addr),
            Chunk::Float32 => format!("ldr {}, {}", s(dest), addr),
            Chunk::Float64 => format!("ldr {}, {}", d(dest), addr),
        };
        self.line(&insn);
    }

    fn store(&mut self, chunk: Chunk, mode: &Addressing, args: &[Mreg], src: Mreg) {
        let addr = self.amode(mode, args);
        let insn = match chunk {
            Chunk::Int8Signed | Chunk::Int8Unsigned => format!("strb {}, {}", w(src), addr),
            Chunk::Int16Signed | Chunk::Int16Unsigned => {
                format!("strh {}, {}", w(src), addr)
            }
            Chunk::Int32 => format!("str {}, {}", w(src), addr),
            Chunk::Int64 => format!("str {}, {}", x(src), addr),
            Chunk::Float32 => format!("str {}, {}", s(src), addr),
            Chunk::Float64 => format!("str {}, {}", d(src), addr),
        };
        self.line(&insn);
    }

    /// Compare-and-branch/set support: emit the comparison, return the
    /// condition code to branch on.
    fn condition(&mut self, cond: &Condition, args: &[Mreg]) -> &'static str {
        match cond {
            Condition::Ccomp(c) => {
                self.line(&format!("cmp {}, {}", w(args[0]), w(args[1])));
                int_cond(*c, false)
            }
            Condition::Ccompu(c) => {
                self.line(&format!("cmp {}, {}", w(args[0]), w(args[1])));
                int_cond(*c, true)
            }
            Condition::Ccompimm(c, n) => {
                self.cmp_imm(&w(args[0]), *n as i64, "w17");
                int_cond(*c, false)
            }
            Condition::Ccompuimm(c, n) => {
                self.cmp_imm(&w(args[0]), *n as i64, "w17");
                int_cond(*c, true)
            }
            Condition::Ccompl(c) => {
                self.line(&format!("cmp {}, {}", x(args[0]), x(args[1])));
                int_cond(*c, false)
            }
            Condition::Ccomplu(c) => {
                self.line(&format!("cmp {}, {}", x(args[0]), x(args[1])));
                int_cond(*c, true)
            }
            Condition::Ccomplimm(c, n) => {
                self.cmp_imm(&x(args[0]), *n, "x17");
                int_cond(*c, false)
            }
            Condition::Ccompluimm(c, n) => {
                self.cmp_imm(&x(args[0]), *n, "x17");
                int_cond(*c, true)
            }
            Condition::Ccompf(c) => {
                self.line(&format!("fcmp {}, {}", d(args[0]), d(args[1])));
                float_cond(*c)
            }
            Condition::Cnotcompf(c) => {
                self.line(&format!("fcmp {}, {}", d(args[0]), d(args[1])));
                float_cond_neg(*c)
            }
            Condition::Ccompfs(c) => {
                self.line(&format!("fcmp {}, {}", s(args[0]), s(args[1])));
                float_cond(*c)
            }
            Condition::Cnotcompfs(c) => {
                self.line(&format!("fcmp {}, {}", s(args[0]), s(args[1])));
                float_cond_neg(*c)
            }
        }
    }

    fn cmp_imm(&mut self, reg: &str, n: i64, scratch: &str) {
        if (0..=4095).contains(&n) {
            self.line(&format!("cmp {}, #{}", reg, n));
        } else if (-4095..0).contains(&n) {
            self.line(&format!("cmn {}, #{}", reg, -n));
        } else {
            self.mov_imm(scratch, n as u64);
            self.line(&format!("cmp {}, {}", reg, scratch));
        }
    }

    /// Add/sub with a possibly large immediate.
    fn arith_imm(&mut self, mnemonic_add: &str, mnemonic_sub: &str, dst: &str, src: &str, n: i64, scratch: &str) {
        if (0..=4095).contains(&n) {
            self.line(&format!("{} {}, {}, #{}", mnemonic_add, dst, src, n));
        } else if (-4095..0).contains(&n) {
            self.line(&format!("{} {}, {}, #{}", mnemonic_sub, dst, src, -n));
        } else {
            self.mov_imm(scratch, n as u64);
            self.line(&format!("{} {}, {}, {}", mnemonic_add, dst, src, scratch));
        }
    }

    fn shift_name(op: ShiftOp) -> &'static str {
        match op {
            ShiftOp::Lsl => "lsl",
            ShiftOp::Lsr => "lsr",
            ShiftOp::Asr => "asr",
        }
    }

    fn op(&mut self, op: &Operation, args: &[Mreg], dest: Mreg) {
        use Operation::*;
        let sh = Self::shift_name;
        match op {
            Omove => match dest.class() {
                RegClass::Int => self.line(&format!("mov {}, {}", x(dest), x(args[0]))),
                RegClass::Float => self.line(&format!("fmov {}, {}", d(dest), d(args[0]))),
            },
            Ointconst(n) => {
                let v = *n as u32 as u64;
                let dst = w(dest);
                self.mov_imm(&dst, v);
            }
            Olongconst(n) => {
                let dst = x(dest);
                self.mov_imm(&dst, *n as u64);
            }
            Ofloatconst(v) => {
                self.mov_imm("x16", v.to_bits());
                self.line(&format!("fmov {}, x16", d(dest)));
            }
            Osingleconst(v) => {
                self.mov_imm("x16", v.to_bits() as u64);
                self.line(&format!("fmov {}, w16", s(dest)));
            }
            Oaddrsymbol(sym, ofs) => {
                let dst = x(dest);
                self.global_addr(&dst, *sym, *ofs);
            }
            Oaddrstack(ofs) => {
                let dst = x(dest);
                self.arith_imm("add", "sub", &dst, "sp", *ofs, "x16");
            }
            Oneg => self.line(&format!("neg {}, {}", w(dest), w(args[0]))),
            Oadd => self.line(&format!(
                "add {}, {}, {}",
                w(dest),
                w(args[0]),
                w(args[1])
            )),
            Oaddshift(op, n) => self.line(&format!(
                "add {}, {}, {}, {} #{}",
                w(dest),
                w(args[0]),
                w(args[1]),
                sh(*op),
                n
            )),
            Oaddimm(n) => {
                let dst = w(dest);
                let src = w(args[0]);
                self.arith_imm("add", "sub", &dst, &src, *n as i64, "w16");
            }
            Osub => self.line(&format!(
                "sub {}, {}, {}",
                w(dest),
                w(args[0]),
                w(args[1])
            )),
            Osubshift(op, n) => self.line(&format!(
                "sub {}, {}, {}, {} #{}",
                w(dest),
                w(args[0]),
                w(args[1]),
                sh(*op),
                n
            )),
            Omul => self.line(&format!(
                "mul {}, {}, {}",
                w(dest),
                w(args[0]),
                w(args[1])
            )),
            Omadd => self.line(&format!(
                "madd {}, {}, {}, {}",
                w(dest),
                w(args[1]),
                w(args[2]),
                w(args[0])
            )),
            Omsub => self.line(&format!(
                "msub {}, {}, {}, {}",
                w(dest),
                w(args[1]),
                w(args[2]),
                w(args[0])
            )),
            Odiv => self.line(&format!(
                "sdiv {}, {}, {}",
                w(dest),
                w(args[0]),
                w(args[1])
            )),
            Odivu => self.line(&format!(
                "udiv {}, {}, {}",
                w(dest),
                w(args[0]),
                w(args[1])
            )),
            Oand => self.line(&format!(
                "and {}, {}, {}",
                w(dest),
                w(args[0]),
                w(args[1])
            )),
            Oandshift(op, n) => self.line(&format!(
                "and {}, {}, {}, {} #{}",
                w(dest),
                w(args[0]),
                w(args[1]),
                sh(*op),
                n
            )),
            Oandimm(n) => {
                self.mov_imm("w16", *n as u32 as u64);
                self.line(&format!("and {}, {}, w16", w(dest), w(args[0])));
            }
            Oor => self.line(&format!(
                "orr {}, {}, {}",
                w(dest),
                w(args[0]),
                w(args[1])
            )),
            Oorshift(op, n) => self.line(&format!(
                "orr {}, {}, {}, {} #{}",
                w(dest),
                w(args[0]),
                w(args[1]),
                sh(*op),
                n
            )),
            Oorimm(n) => {
                self.mov_imm("w16", *n as u32 as u64);
                self.line(&format!("orr {}, {}, w16", w(dest), w(args[0])));
            }
            Oxor => self.line(&format!(
                "eor {}, {}, {}",
                w(dest),
                w(args[0]),
                w(args[1])
            )),
            Oxorshift(op, n) => self.line(&format!(
                "eor {}, {}, {}, {} #{}",
                w(dest),
                w(args[0]),
                w(args[1]),
                sh(*op),
                n
            )),
            Oxorimm(n) => {
                self.mov_imm("w16", *n as u32 as u64);
                self.line(&format!("eor {}, {}, w16", w(dest), w(args[0])));
            }
            Onot => self.line(&format!("mvn {}, {}", w(dest), w(args[0]))),
            Onotshift(op, n) => self.line(&format!(
                "mvn {}, {}, {} #{}",
                w(dest),
                w(args[0]),
                sh(*op),
                n
            )),
            Oshl => self.line(&format!(
                "lsl {}, {}, {}",
                w(dest),
                w(args[0]),
                w(args[1])
            )),
            Oshr => self.line(&format!(
                "asr {}, {}, {}",
                w(dest),
                w(args[0]),
                w(args[1])
            )),
            Oshru => self.line(&format!(
                "lsr {}, {}, {}",
                w(dest),
                w(args[0]),
                w(args[1])
            )),
            Oshiftimm(op, n) => self.line(&format!(
                "{} {}, {}, #{}",
                sh(*op),
                w(dest),
                w(args[0]),
                n
            )),
            Onegl => self.line(&format!("neg {}, {}", x(dest), x(args[0]))),
            Oaddl => self.line(&format!(
                "add {}, {}, {}",
                x(dest),
                x(args[0]),
                x(args[1])
            )),
            Oaddlshift(op, n) => self.line(&format!(
                "add {}, {}, {}, {} #{}",
                x(dest),
                x(args[0]),
                x(args[1]),
                sh(*op),
                n
            )),
            Oaddlimm(n) => {
                let dst = x(dest);
                let src = x(args[0]);
                self.arith_imm("add", "sub", &dst, &src, *n, "x16");
            }
            Osubl => self.line(&format!(
                "sub {}, {}, {}",
                x(dest),
                x(args[0]),
                x(args[1])
            )),
            Osublshift(op, n) => self.line(&format!(
                "sub {}, {}, {}, {} #{}",
                x(dest),
                x(args[0]),
                x(args[1]),
                sh(*op),
                n
            )),
            Omull => self.line(&format!(
                "mul {}, {}, {}",
                x(dest),
                x(args[0]),
                x(args[1])
            )),
            Omaddl => self.line(&format!(
                "madd {}, {}, {}, {}",
                x(dest),
                x(args[1]),
                x(args[2]),
                x(args[0])
            )),
            Omsubl => self.line(&format!(
                "msub {}, {}, {}, {}",
                x(dest),
                x(args[1]),
                x(args[2]),
                x(args[0])
            )),
            Odivl => self.line(&format!(
                "sdiv {}, {}, {}",
                x(dest),
                x(args[0]),
                x(args[1])
            )),
            Odivlu => self.line(&format!(
                "udiv {}, {}, {}",
                x(dest),
                x(args[0]),
                x(args[1])
            )),
            Oandl => self.line(&format!(
                "and {}, {}, {}",
                x(dest),
                x(args[0]),
                x(args[1])
            )),
            Oandlshift(op, n) => self.line(&format!(
                "and {}, {}, {}, {} #{}",
                x(dest),
                x(args[0]),
                x(args[1]),
                sh(*op),
                n
            )),
            Oandlimm(n) => {
                self.mov_imm("x16", *n as u64);
                self.line(&format!("and {}, {}, x16", x(dest), x(args[0])));
            }
            Oorl => self.line(&format!(
                "orr {}, {}, {}",
                x(dest),
                x(args[0]),
                x(args[1])
            )),
            Oorlshift(op, n) => self.line(&format!(
                "orr {}, {}, {}, {} #{}",
                x(dest),
                x(args[0]),
                x(args[1]),
                sh(*op),
                n
            )),
            Oorlimm(n) => {
                self.mov_imm("x16", *n as u64);
                self.line(&format!("orr {}, {}, x16", x(dest), x(args[0])));
            }
            Oxorl => self.line(&format!(
                "eor {}, {}, {}",
                x(dest),
                x(args[0]),
                x(args[1])
            )),
            Oxorlshift(op, n) => self.line(&format!(
                "eor {}, {}, {}, {} #{}",
                x(dest),
                x(args[0]),
                x(args[1]),
                sh(*op),
                n
            )),
            Oxorlimm(n) => {
                self.mov_imm("x16", *n as u64);
                self.line(&format!("eor {}, {}, x16", x(dest), x(args[0])));
            }
            Onotl => self.line(&format!("mvn {}, {}", x(dest), x(args[0]))),
            Onotlshift(op, n) => self.line(&format!(
                "mvn {}, {}, {} #{}",
                x(dest),
                x(args[0]),
                sh(*op),
                n
            )),
            Oshll => self.line(&format!(
                "lsl {}, {}, {}",
                x(dest),
                x(args[0]),
                x(args[1])
            )),
            Oshrl => self.line(&format!(
                "asr {}, {}, {}",
                x(dest),
                x(args[0]),
                x(args[1])
            )),
            Oshrlu => self.line(&format!(
                "lsr {}, {}, {}",
                x(dest),
                x(args[0]),
                x(args[1])
            )),
            Oshiftlimm(op, n) => self.line(&format!(
                "{} {}, {}, #{}",
                sh(*op),
                x(dest),
                x(args[0]),
                n
            )),
            Ocast8signed => self.line(&format!("sxtb {}, {}", w(dest), w(args[0]))),
            Ocast8unsigned => self.line(&format!("uxtb {}, {}", w(dest), w(args[0]))),
            Ocast16signed => self.line(&format!("sxth {}, {}", w(dest), w(args[0]))),
            Ocast16unsigned => self.line(&format!("uxth {}, {}", w(dest), w(args[0]))),
            Ocast32signed => self.line(&format!("sxtw {}, {}", x(dest), w(args[0]))),
            // Writing the w form zero-extends into the x register.
            Ocast32unsigned => self.line(&format!("mov {}, {}", w(dest), w(args[0]))),
            Olowlong => self.line(&format!("mov {}, {}", w(dest), w(args[0]))),
            Onegf => self.line(&format!("fneg {}, {}", d(dest), d(args[0]))),
            Oabsf => self.line(&format!("fabs {}, {}", d(dest), d(args[0]))),
            Oaddf => self.line(&format!(
                "fadd {}, {}, {}",
                d(dest),
                d(args[0]),
                d(args[1])
            )),
            Osubf => self.line(&format!(
                "fsub {}, {}, {}",
                d(dest),
                d(args[0]),
                d(args[1])
            )),
            Omulf => self.line(&format!(
                "fmul {}, {}, {}",
                d(dest),
                d(args[0]),
                d(args[1])
            )),
            Odivf => self.line(&format!(
                "fdiv {}, {}, {}",
                d(dest),
                d(args[0]),
                d(args[1])
            )),
            Ofmadd => self.line(&format!(
                "fmadd {}, {}, {}, {}",
                d(dest),
                d(args[1]),
                d(args[2]),
                d(args[0])
            )),
            Ofmsub => self.line(&format!(
                "fmsub {}, {}, {}, {}",
                d(dest),
                d(args[1]),
                d(args[2]),
                d(args[0])
            )),
            Onegs => self.line(&format!("fneg {}, {}", s(dest), s(args[0]))),
            Oabss => self.line(&format!("fabs {}, {}", s(dest), s(args[0]))),
            Oadds => self.line(&format!(
                "fadd {}, {}, {}",
                s(dest),
                s(args[0]),
                s(args[1])
            )),
            Osubs => self.line(&format!(
                "fsub {}, {}, {}",
                s(dest),
                s(args[0]),
                s(args[1])
            )),
            Omuls => self.line(&format!(
                "fmul {}, {}, {}",
                s(dest),
                s(args[0]),
                s(args[1])
            )),
            Odivs => self.line(&format!(
                "fdiv {}, {}, {}",
                s(dest),
                s(args[0]),
                s(args[1])
            )),
            Ofmadds => self.line(&format!(
                "fmadd {}, {}, {}, {}",
                s(dest),
                s(args[1]),
                s(args[2]),
                s(args[0])
            )),
            Ofmsubs => self.line(&format!(
                "fmsub {}, {}, {}, {}",
                s(dest),
                s(args[1]),
                s(args[2]),
                s(args[0])
            )),
            Osingleoffloat => self.line(&format!("fcvt {}, {}", s(dest), d(args[0]))),
            Ofloatofsingle => self.line(&format!("fcvt {}, {}", d(dest), s(args[0]))),
            Ointoffloat => self.line(&format!("fcvtzs {}, {}", w(dest), d(args[0]))),
            Ointuoffloat => self.line(&format!("fcvtzu {}, {}", w(dest), d(args[0]))),
            Ofloatofint => self.line(&format!("scvtf {}, {}", d(dest), w(args[0]))),
            Ofloatofintu => self.line(&format!("ucvtf {}, {}", d(dest), w(args[0]))),
            Olongoffloat => self.line(&format!("fcvtzs {}, {}", x(dest), d(args[0]))),
            Olonguoffloat => self.line(&format!("fcvtzu {}, {}", x(dest), d(args[0]))),
            Ofloatoflong => self.line(&format!("scvtf {}, {}", d(dest), x(args[0]))),
            Ofloatoflongu => self.line(&format!("ucvtf {}, {}", d(dest), x(args[0]))),
            Ointofsingle => self.line(&format!("fcvtzs {}, {}", w(dest), s(args[0]))),
            Ointuofsingle => self.line(&format!("fcvtzu {}, {}", w(dest), s(args[0]))),
            Osingleofint => self.line(&format!("scvtf {}, {}", s(dest), w(args[0]))),
            Osingleofintu => self.line(&format!("ucvtf {}, {}", s(dest), w(args[0]))),
            Olongofsingle => self.line(&format!("fcvtzs {}, {}", x(dest), s(args[0]))),
            Olonguofsingle => self.line(&format!("fcvtzu {}, {}", x(dest), s(args[0]))),
            Osingleoflong => self.line(&format!("scvtf {}, {}", s(dest), x(args[0]))),
            Osingleoflongu => self.line(&format!("ucvtf {}, {}", s(dest), x(args[0]))),
            Ocmp(cond) => {
                let cc = self.condition(cond, args);
                self.line(&format!("cset {}, {}", w(dest), cc));
            }
        }
    }

    // The frame is built by pushing the FP/LR pair first and then
    // allocating the rest, so no store offset ever outgrows the `stp`
    // immediate form:
    //
    //     stp x29, x30, [sp, #-16]!
    //     mov x29, sp
    //     sub sp, sp, #frame-16
    //
    // FP still ends up at SP + frame - 16, which is what `Mgetparam`
    // relies on.

    fn prologue(&mut self, func: &Function) {
        if func.stacksize > 0 {
            self.line("stp x29, x30, [sp, #-16]!");
            self.line("mov x29, sp");
            if func.stacksize > 16 {
                self.arith_imm("sub", "add", "sp", "sp", func.stacksize - 16, "x16");
            }
        }
    }

    fn epilogue(&mut self, func: &Function) {
        if func.stacksize > 0 {
            if func.stacksize > 16 {
                self.arith_imm("add", "sub", "sp", "sp", func.stacksize - 16, "x16");
            }
            self.line("ldp x29, x30, [sp], #16");
        }
    }

    fn function(&mut self, name: Symbol, func: &Function) {
        let sym = self.dialect.sym(name);
        self.line(".text");
        self.line(".balign 4");
        self.line(&format!(".globl {}", sym));
        if self.dialect == Dialect::Elf {
            self.line(&format!(".type {}, @function", sym));
        }
        writeln!(self.out, "{}:", sym).unwrap();
        self.prologue(func);

        for inst in &func.body {
            match inst {
                Inst::Mgetstack { ofs, ty, dest } => {
                    let addr = self.addr_sp(*ofs);
                    let r = reg(*dest, *ty);
                    self.line(&format!("ldr {}, {}", r, addr));
                }
                Inst::Msetstack { src, ofs, ty } => {
                    let addr = self.addr_sp(*ofs);
                    let r = reg(*src, *ty);
                    self.line(&format!("str {}, {}", r, addr));
                }
                Inst::Mgetparam { ofs, ty, dest } => {
                    let r = reg(*dest, *ty);
                    if func.stacksize > 0 {
                        self.line(&format!("ldr {}, [x29, #{}]", r, 16 + ofs));
                    } else {
                        // Frameless leaf: the caller's outgoing area is
                        // right at SP.
                        let addr = self.addr_sp(*ofs);
                        self.line(&format!("ldr {}, {}", r, addr));
                    }
                }
                Inst::Mop { op, args, dest } => self.op(op, args, *dest),
                Inst::Mload {
                    chunk,
                    mode,
                    args,
                    dest,
                } => self.load(*chunk, mode, args, *dest),
                Inst::Mstore {
                    chunk,
                    mode,
                    args,
                    src,
                } => self.store(*chunk, mode, args, *src),
                Inst::Mcall { callee, .. } => match callee {
                    Callee::Symbol(sym) => {
                        let name = self.dialect.sym(*sym);
                        self.line(&format!("bl {}", name));
                    }
                    Callee::Reg(r) => self.line(&format!("blr {}", x(*r))),
                },
                Inst::Mtailcall { callee, .. } => {
                    self.epilogue(func);
                    match callee {
                        Callee::Symbol(sym) => {
                            let name = self.dialect.sym(*sym);
                            self.line(&format!("b {}", name));
                        }
                        Callee::Reg(r) => self.line(&format!("br {}", x(*r))),
                    }
                }
                Inst::Mbuiltin { builtin } => match builtin {
                    Builtin::Memcpy { size, .. } => {
                        self.mov_imm("x2", *size as u64);
                        let memcpy = self.dialect.sym(
                            charcoal_codegen::symbols::symbol("memcpy"),
                        );
                        self.line(&format!("bl {}", memcpy));
                    }
                },
                Inst::Mlabel(l) => {
                    let name = self.label_name(*l);
                    writeln!(self.out, "{}:", name).unwrap();
                }
                Inst::Mgoto(l) => {
                    let name = self.label_name(*l);
                    self.line(&format!("b {}", name));
                }
                Inst::Mcond { cond, args, target } => {
                    let cc = self.condition(cond, args);
                    let name = self.label_name(*target);
                    self.line(&format!("b.{} {}", cc, name));
                }
                Inst::Mjumptable { arg, targets } => {
                    let table = self
                        .dialect
                        .local(&format!("jt{}", self.jumptables));
                    self.jumptables += 1;
                    self.line(&format!("adr x16, {}", table));
                    self.line(&format!("add x16, x16, {}, uxtw #2", w(*arg)));
                    self.line("br x16");
                    writeln!(self.out, "{}:", table).unwrap();
                    for t in targets {
                        let name = self.label_name(*t);
                        self.line(&format!("b {}", name));
                    }
                }
                Inst::Mreturn => {
                    self.epilogue(func);
                    self.line("ret");
                }
            }
        }
        self.out.push('\n');
    }

    fn data(&mut self, prog: &Program) {
        for (name, item) in &prog.globals {
            let sym = self.dialect.sym(*name);
            if item.readonly {
                let section = self.dialect.rodata();
                self.out.push_str(section);
                self.out.push('\n');
            } else {
                self.line(".data");
            }
            self.line(&format!(".balign {}", item.align.max(1)));
            self.line(&format!(".globl {}", sym));
            writeln!(self.out, "{}:", sym).unwrap();
            match &item.init {
                None => self.line(&format!(".space {}", item.size)),
                Some(bytes) => {
                    for chunk in bytes.chunks(16) {
                        let list: Vec<String> =
                            chunk.iter().map(|b| b.to_string()).collect();
                        self.line(&format!(".byte {}", list.join(", ")));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charcoal_codegen::ir::types::Signature;

    fn emit_one(func: Function) -> String {
        let mut prog = Program::default();
        prog.functions
            .push((charcoal_codegen::symbols::symbol("f"), func));
        emit_program(&prog, Dialect::Elf)
    }

    #[test]
    fn leaf_return_constant() {
        let func = Function {
            sig: Signature {
                params: vec![],
                ret: Some(Type::I32),
                variadic: false,
            },
            body: vec![
                Inst::Mop {
                    op: Operation::Ointconst(42),
                    args: Default::default(),
                    dest: Mreg::X0,
                },
                Inst::Mreturn,
            ],
            stacksize: 0,
            saved_regs: vec![],
            is_leaf: true,
        };
        let asm = emit_one(func);
        assert!(asm.contains("movz w0, #42"), "{}", asm);
        assert!(asm.contains("\tret\n"), "{}", asm);
        // No frame: no stp/ldp.
        assert!(!asm.contains("stp"), "{}", asm);
    }

    #[test]
    fn framed_function_brackets_with_prologue() {
        let func = Function {
            sig: Signature::void(),
            body: vec![
                Inst::Mcall {
                    sig: Signature::void(),
                    callee: Callee::Symbol(charcoal_codegen::symbols::symbol("g")),
                },
                Inst::Mreturn,
            ],
            stacksize: 32,
            saved_regs: vec![],
            is_leaf: false,
        };
        let asm = emit_one(func);
        assert!(asm.contains("stp x29, x30, [sp, #-16]!"), "{}", asm);
        assert!(asm.contains("mov x29, sp"), "{}", asm);
        assert!(asm.contains("sub sp, sp, #16"), "{}", asm);
        assert!(asm.contains("bl g"), "{}", asm);
        assert!(asm.contains("add sp, sp, #16"), "{}", asm);
        assert!(asm.contains("ldp x29, x30, [sp], #16"), "{}", asm);
    }

    #[test]
    fn macho_decorates_symbols() {
        let func = Function {
            sig: Signature::void(),
            body: vec![Inst::Mreturn],
            stacksize: 0,
            saved_regs: vec![],
            is_leaf: true,
        };
        let mut prog = Program::default();
        prog.functions
            .push((charcoal_codegen::symbols::symbol("main"), func));
        let asm = emit_program(&prog, Dialect::MachO);
        assert!(asm.contains(".globl _main"), "{}", asm);
        assert!(asm.contains("_main:"), "{}", asm);
    }
}
