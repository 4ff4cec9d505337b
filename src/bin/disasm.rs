use spv_weld::spv::print;
use spv_weld::spv::stream::InstructionStream;

fn main() {
    env_logger::init();

    match &std::env::args().collect::<Vec<_>>()[..] {
        [_, in_file] => run(in_file, None),
        [_, in_file, out_file] => run(in_file, Some(out_file)),
        args => {
            eprintln!(
                "Usage: {} IN.spv [STRIPPED_OUT.spv]",
                args.first().map_or("disasm", |arg| arg.as_str())
            );
            std::process::exit(1);
        }
    }
}

fn run(in_file: &str, out_file: Option<&str>) {
    let bytes = match std::fs::read(in_file) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("error: reading {in_file}: {e}");
            std::process::exit(1);
        }
    };
    let stream = match InstructionStream::from_bytes(&bytes) {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = stream.validate() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }

    print!("{}", print::disassemble(&stream));

    if let Some(out_file) = out_file {
        let stripped = stream.strip();
        let bytes: &[u8] = bytemuck::cast_slice(stripped.words());
        if let Err(e) = std::fs::write(out_file, bytes) {
            eprintln!("error: writing {out_file}: {e}");
            std::process::exit(1);
        }
    }
}
