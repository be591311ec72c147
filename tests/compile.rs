//! End-to-end pipeline tests: C text in, AArch64 assembly text out.
//!
//! These drive the reader, every lowering pass and the emitter, and then
//! assert structural facts about the output — they do not run the host
//! assembler, so they hold on any development machine.

use charcoal_codegen::context::{Context, DumpConfig};
use charcoal_codegen::ir::mach;
use charcoal_tools::emit::{emit_program, Dialect};

/// Compile C source to a Mach program.
fn compile(src: &str) -> mach::Program {
    let clight = charcoal_reader::parse_program(src, "test.c").expect("front-end");
    let ctx = Context::new();
    let (mach, _) = ctx
        .compile(clight, DumpConfig::default())
        .expect("pipeline");
    mach
}

/// Compile C source to ELF-flavoured assembly text.
fn compile_to_asm(src: &str) -> String {
    emit_program(&compile(src), Dialect::Elf)
}

fn mach_function<'a>(prog: &'a mach::Program, name: &str) -> &'a mach::Function {
    &prog
        .functions
        .iter()
        .find(|(n, _)| n.as_str() == name)
        .unwrap_or_else(|| panic!("no function `{}`", name))
        .1
}

#[test]
fn return_42() {
    let prog = compile("int main() { return 42; }");
    let main = mach_function(&prog, "main");
    assert_eq!(main.stacksize % 16, 0);
    let asm = compile_to_asm("int main() { return 42; }");
    assert!(asm.contains("movz w0, #42"), "{}", asm);
    assert!(asm.contains("ret"), "{}", asm);
}

#[test]
fn add_two_arguments() {
    let src = "int add(int a, int b) { return a + b; }\n\
               int main() { return add(1, 2); }";
    let prog = compile(src);
    let main = mach_function(&prog, "main");
    // main calls add, so it is not a leaf and carries an aligned frame.
    assert!(!main.is_leaf);
    assert!(main.stacksize >= 16);
    assert_eq!(main.stacksize % 16, 0);
    let asm = compile_to_asm(src);
    assert!(asm.contains("bl add") || asm.contains("b add"), "{}", asm);
    assert!(asm.contains("add w"), "{}", asm);
}

#[test]
fn recursive_fibonacci() {
    let src = "int f(int n) { if (n < 2) return n; return f(n - 1) + f(n - 2); }\n\
               int main() { return f(10); }";
    let prog = compile(src);
    let f = mach_function(&prog, "f");
    // A value lives across the inner call, so a callee-saved register is
    // saved and restored.
    assert!(!f.saved_regs.is_empty(), "expected callee-saved use");
    let asm = compile_to_asm(src);
    assert!(asm.contains("bl f"), "{}", asm);
    assert!(asm.contains("b.ge") || asm.contains("b.lt"), "{}", asm);
}

#[test]
fn array_sum() {
    let src = "int main() { int a[3] = {10, 20, 30}; return a[0] + a[1] + a[2]; }";
    let prog = compile(src);
    let main = mach_function(&prog, "main");
    // The array lives in the frame.
    assert!(main.stacksize >= 16);
    let asm = compile_to_asm(src);
    // Element stores and loads go through SP-relative addresses.
    assert!(asm.contains("[sp"), "{}", asm);
}

#[test]
fn pointer_store_through_local() {
    let src = "int main() { int x = 5; int* p = &x; *p = 7; return x; }";
    let prog = compile(src);
    let main = mach_function(&prog, "main");
    // x is address-taken: it needs stack data in the frame.
    assert!(main.stacksize >= 16, "x must live in memory");
    let asm = compile_to_asm(src);
    assert!(asm.contains("str"), "{}", asm);
    assert!(asm.contains("ldr"), "{}", asm);
}

#[test]
fn loop_sum() {
    let src = "int main() { int s = 0; for (int i = 0; i < 10; i++) s += i; return s; }";
    let prog = compile(src);
    let main = mach_function(&prog, "main");
    // A loop means a backward jump somewhere.
    assert!(main
        .body
        .iter()
        .any(|i| matches!(i, mach::Inst::Mcond { .. })));
    let asm = compile_to_asm(src);
    assert!(asm.contains("b."), "{}", asm);
}

#[test]
fn switch_dense_uses_jump_table() {
    let src = "int f(int x) {\n\
                 switch (x) {\n\
                   case 0: return 10; case 1: return 11; case 2: return 12;\n\
                   case 3: return 13; case 4: return 14; case 5: return 15;\n\
                   default: return -1;\n\
                 }\n\
               }\n\
               int main() { return f(3); }";
    let prog = compile(src);
    let f = mach_function(&prog, "f");
    assert!(
        f.body
            .iter()
            .any(|i| matches!(i, mach::Inst::Mjumptable { .. })),
        "dense switch should lower to a jump table"
    );
    let asm = compile_to_asm(src);
    assert!(asm.contains("br x16"), "{}", asm);
}

#[test]
fn switch_sparse_avoids_jump_table() {
    let src = "int f(int x) {\n\
                 switch (x) {\n\
                   case 1: return 1; case 100: return 2; case 2000: return 3;\n\
                   case 30000: return 4; case 400000: return 5; case 5000000: return 6;\n\
                 }\n\
                 return 0;\n\
               }";
    let prog = compile(src);
    let f = mach_function(&prog, "f");
    assert!(
        !f.body
            .iter()
            .any(|i| matches!(i, mach::Inst::Mjumptable { .. })),
        "sparse switch must not build a table"
    );
}

#[test]
fn string_literals_are_hoisted() {
    let src = "int puts(char *s);\n\
               int main() { puts(\"hello\"); return 0; }";
    let prog = compile(src);
    assert!(prog
        .globals
        .iter()
        .any(|(name, item)| name.as_str().starts_with("__stringlit_")
            && item.readonly
            && item.init.as_deref() == Some(&b"hello\0"[..])));
    let asm = compile_to_asm(src);
    assert!(asm.contains("__stringlit_1"), "{}", asm);
    assert!(asm.contains("bl puts"), "{}", asm);
}

#[test]
fn tail_call_is_emitted() {
    let src = "int g(int x);\n\
               int f(int x) { return g(x + 1); }";
    let prog = compile(src);
    let f = mach_function(&prog, "f");
    assert!(
        f.body
            .iter()
            .any(|i| matches!(i, mach::Inst::Mtailcall { .. })),
        "call-then-return should become a tail call"
    );
    let asm = compile_to_asm(src);
    assert!(asm.contains("b g"), "{}", asm);
}

#[test]
fn struct_assignment_calls_memcpy() {
    let src = "struct pair { long a; long b; };\n\
               struct pair x; struct pair y;\n\
               int main() { x = y; return 0; }";
    let prog = compile(src);
    let main = mach_function(&prog, "main");
    assert!(main
        .body
        .iter()
        .any(|i| matches!(i, mach::Inst::Mbuiltin { .. })));
    let asm = compile_to_asm(src);
    assert!(asm.contains("bl memcpy"), "{}", asm);
}

#[test]
fn doubles_use_float_registers() {
    let src = "double scale(double x) { return x * 2.0; }";
    let asm = compile_to_asm(src);
    assert!(asm.contains("fmul d"), "{}", asm);
}

#[test]
fn frame_alignment_holds_everywhere() {
    let srcs = [
        "int main() { return 0; }",
        "int g(void); int main() { return g(); }",
        "int main() { int a[7]; a[0] = 1; return a[0]; }",
        "int f(int a, int b, int c, int d, int e, int x, int y, int z, int q) { return q; }\n\
         int main() { return f(1,2,3,4,5,6,7,8,9); }",
    ];
    for src in &srcs {
        let prog = compile(src);
        for (name, func) in &prog.functions {
            assert_eq!(
                func.stacksize % 16,
                0,
                "frame of `{}` not aligned in: {}",
                name,
                src
            );
            if !func.is_leaf {
                assert!(func.stacksize >= 16, "non-leaf `{}` without a frame", name);
            }
        }
    }
}

#[test]
fn printers_are_deterministic() {
    let src = "int f(int n) { int s = 0; while (n) { s += n; n--; } return s; }";
    let clight = charcoal_reader::parse_program(src, "test.c").unwrap();
    let ctx = Context::new();
    let config = DumpConfig {
        simplified: true,
        cminor: true,
        rtl: true,
        ltl: true,
        mach: true,
    };
    let (_, first) = ctx.compile(clight.clone(), config).unwrap();
    let (_, second) = ctx.compile(clight, config).unwrap();
    assert_eq!(first.simplified, second.simplified);
    assert_eq!(first.cminor, second.cminor);
    assert_eq!(first.rtl, second.rtl);
    assert_eq!(first.ltl, second.ltl);
    assert_eq!(first.mach, second.mach);
}

#[test]
fn eight_plus_arguments_use_the_stack() {
    let src = "int f(int a, int b, int c, int d, int e, int x, int y, int z, int q) {\n\
                 return a + q;\n\
               }\n\
               int main() { return f(1,2,3,4,5,6,7,8,9); }";
    let prog = compile(src);
    let main = mach_function(&prog, "main");
    // The ninth argument travels through the outgoing area.
    assert!(main
        .body
        .iter()
        .any(|i| matches!(i, mach::Inst::Msetstack { .. })));
    let f = mach_function(&prog, "f");
    assert!(f
        .body
        .iter()
        .any(|i| matches!(i, mach::Inst::Mgetparam { .. })));
}
