use criterion::{black_box, criterion_group, criterion_main, Criterion};

use rv32emu::config::CoreConfig;
use rv32emu::cpu::Rv32Core;
use rv32emu::ram::{Ram, WordBus};

/// Sum the integers 1000..0 and exit through `ecall` with a7 = 93.
const SUM_LOOP: &[u32] = &[
    0x05D0_0893, // addi x17, x0, 93
    0x0000_0293, // addi x5, x0, 0
    0x3E80_0313, // addi x6, x0, 1000
    0x0062_82B3, // add x5, x5, x6
    0xFFF3_0313, // addi x6, x6, -1
    0xFE03_1CE3, // bne x6, x0, -8
    0x0000_0073, // ecall
];

fn bench_core_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("core_run");
    group.sample_size(50);

    group.bench_function("sum_loop_1000", |b| {
        b.iter(|| {
            let mut core = Rv32Core::new(CoreConfig::default());
            let mut ram = Ram::new();
            for (i, instr) in SUM_LOOP.iter().enumerate() {
                ram.write_word(i as u32, *instr);
            }
            let cycles = core.run(&mut ram, 0);
            assert!(core.is_finished());
            black_box(cycles);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_core_run);
criterion_main!(benches);
