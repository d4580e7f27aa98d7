use std::{hint::black_box, io::Cursor};

use asd_protocol::{
    JtagCommand, Message, Request,
    frame::{ShiftFrame, TapStateFrame},
    tap::TapState,
    tms::TmsSequence,
};
use criterion::{Criterion, criterion_group, criterion_main};

fn shift_request(num_bytes: usize) -> Message {
    Request::Jtag(JtagCommand::Shift {
        num_bits: 8 * num_bytes as u32,
        end_state: TapState::Ex1DR,
        read_tdo: true,
        tdi: vec![0xA5; num_bytes].into_boxed_slice(),
    })
    .to_message(1)
}

fn encode_messages(c: &mut Criterion) {
    let message = shift_request(1024);
    c.bench_function("encode shift 1KiB", |b| {
        b.iter(|| black_box(&message).to_bytes())
    });

    let bytes = message.to_bytes().unwrap();
    c.bench_function("decode shift 1KiB", |b| {
        b.iter(|| {
            let message = Message::from_reader(&mut Cursor::new(black_box(&bytes)), 8191).unwrap();
            Request::from_message(&message).unwrap()
        })
    });
}

fn encode_frames(c: &mut Criterion) {
    let frame = ShiftFrame {
        write_bits: 1024,
        write_data: vec![0x5A; 128].into_boxed_slice(),
        read_bits: 1024,
        last_transaction: true,
    };
    c.bench_function("encode shift frame", |b| b.iter(|| black_box(&frame).encode()));

    c.bench_function("tms transitions", |b| {
        b.iter(|| {
            for src in TapState::ALL {
                for dst in TapState::ALL {
                    black_box(TapStateFrame::from_sequence(TmsSequence::transition(src, dst)));
                }
            }
        })
    });
}

criterion_group!(benches, encode_messages, encode_frames);
criterion_main!(benches);
