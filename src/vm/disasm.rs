use std::fmt::{self, Write};

use super::bytecode::{ByteCode, Constant, Instruction, OpCode};

pub fn disassemble_to_string(bytecode: &ByteCode) -> String {
    let mut output = String::new();
    let _ = disassemble_function(bytecode, &mut output);
    output
}

/// Writes `bytecode` and, after it, every function nested in its constants.
pub fn disassemble_function(bytecode: &ByteCode, w: &mut impl Write) -> fmt::Result {
    writeln!(
        w,
        "== {} (arity={}/{}, upvalues={}, flags={:?}) ==",
        bytecode.name,
        bytecode.arity,
        bytecode.total_arity,
        bytecode.upvalue_count,
        bytecode.flags
    )?;
    let chunk = &bytecode.chunk;
    if !chunk.constants.is_empty() {
        writeln!(w, "  Constants ({}):", chunk.constants.len())?;
        for (i, c) in chunk.constants.iter().enumerate() {
            writeln!(w, "    {}: {}", i, c)?;
        }
    }
    writeln!(w, "  Instructions:")?;
    let mut last_span = None;
    for ins in chunk.instructions() {
        let span = chunk.span_at(ins.offset);
        if span != last_span {
            if let Some(s) = &span {
                writeln!(w, "    ; {}..{}", s.start, s.end)?;
            }
            last_span = span;
        }
        write!(w, "    {:5}: ", ins.offset)?;
        disassemble_instruction(bytecode, &ins, w)?;
        writeln!(w)?;
    }

    for c in &chunk.constants {
        if let Constant::Function(inner) = c {
            writeln!(w)?;
            disassemble_function(inner, w)?;
        }
    }
    Ok(())
}

pub fn disassemble_instruction(bytecode: &ByteCode, ins: &Instruction<'_>, w: &mut impl Write) -> fmt::Result {
    let chunk = &bytecode.chunk;
    let constant = |ix: u32| {
        chunk
            .constants
            .get(ix as usize)
            .map(|c| c.to_string())
            .unwrap_or_else(|| "?".into())
    };
    let ops = ins.operands;
    let w0 = ops.first().copied().unwrap_or(0);
    match ins.op {
        OpCode::Constant | OpCode::GetGlobal | OpCode::SetGlobal | OpCode::RefGlobal | OpCode::Is => {
            write!(w, "{:<12} {} ({})", ins.op, w0, constant(w0))
        }
        OpCode::DefineGlobal => write!(
            w,
            "{:<12} {} ({}) flags={}",
            ins.op,
            w0,
            constant(w0),
            ops.get(1).copied().unwrap_or(0)
        ),
        OpCode::GetAttr | OpCode::SetAttr | OpCode::GetSuper => {
            write!(w, "{:<12} {} ({})", ins.op, w0, constant(w0))
        }
        OpCode::Jump | OpCode::JumpIfFalse | OpCode::JumpIfTrue | OpCode::Loop => {
            let after = ins.offset + 2;
            let target = after as i64 + w0 as i32 as i64;
            write!(w, "{:<12} {} -> {}", ins.op, w0 as i32, target)
        }
        OpCode::IterNext => {
            let off = ops.get(1).copied().unwrap_or(0);
            let target = ins.offset + 3 + off as usize;
            write!(w, "{:<12} slot={} exit -> {}", ins.op, w0, target)
        }
        OpCode::Call | OpCode::CallAsync => write!(
            w,
            "{:<12} argc={} kwargs={}",
            ins.op,
            w0,
            ops.get(1).copied().unwrap_or(0)
        ),
        OpCode::Closure => {
            write!(w, "{:<12} {} ({})", ins.op, w0, constant(w0))?;
            for pair in ops.get(2..).unwrap_or(&[]).chunks(2) {
                if let [is_local, index] = pair {
                    write!(w, " {}{}", if *is_local == 1 { "local:" } else { "up:" }, index)?;
                }
            }
            Ok(())
        }
        OpCode::Class => {
            write!(w, "{:<12} {} ({})", ins.op, w0, constant(w0))?;
            let attrs = ops.get(1).copied().unwrap_or(0) as usize;
            for i in 0..attrs {
                if let Some(name) = ops.get(4 + 2 * i) {
                    write!(w, " {}", constant(*name))?;
                }
            }
            if ops.get(3).copied().unwrap_or(0) != 0 {
                write!(w, " <parent>")?;
            }
            Ok(())
        }
        OpCode::Method => write!(
            w,
            "{:<12} {} ({}) flags={}",
            ins.op,
            w0,
            constant(w0),
            ops.get(1).copied().unwrap_or(0)
        ),
        OpCode::MakePattern => {
            write!(w, "{:<12} required={}", ins.op, w0)?;
            for name in ops.get(2..).unwrap_or(&[]) {
                write!(w, " {}", constant(*name))?;
            }
            Ok(())
        }
        _ if ops.is_empty() => write!(w, "{}", ins.op),
        _ => {
            write!(w, "{:<12}", ins.op)?;
            for o in ops {
                write!(w, " {}", o)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinaryOp;
    use crate::ast::build::*;
    use crate::vm::compiler::compile_program;

    #[test]
    fn test_lists_nested_functions() {
        let f = function("twice", &["x"], vec![ret(bin(BinaryOp::Multiply, var("x"), int(2)))]);
        let bc = compile_program("t", &[def(f)]).unwrap();
        let text = disassemble_to_string(&bc);
        assert!(text.contains("== <script>"));
        assert!(text.contains("== twice (arity=1/1"));
        assert!(text.contains("Closure"));
        assert!(text.contains("DefineGlobal"));
    }

    #[test]
    fn test_jump_targets_are_absolute() {
        let bc = compile_program("t", &[if_(boolean(true), vec![], None)]).unwrap();
        let text = disassemble_to_string(&bc);
        // True; JumpIfFalse +0 -> 3; Null; Return
        assert!(text.contains("-> 3"), "{}", text);
    }
}
