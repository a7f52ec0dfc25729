use chip8_vm::{Chip8, Chip8Result, DISPLAY_X, DISPLAY_Y, LoadError, MAX_ROM_SIZE, u4};

fn assemble(program: &[u16]) -> Vec<u8> {
    program.iter().flat_map(|op| op.to_be_bytes()).collect()
}

fn boot(program: &[u16]) -> Chip8 {
    let mut chip8 = Chip8::with_seed(42);
    chip8.load(&assemble(program)).unwrap();
    chip8
}

#[test]
fn load_then_add() {
    let mut chip8 = boot(&[0x6005, 0x7003]);

    chip8.step().unwrap();
    chip8.step().unwrap();

    assert_eq!(chip8.v()[0], 0x08);
    assert_eq!(chip8.pc(), 0x204);
}

#[test]
fn clear_then_block_for_key() {
    let mut chip8 = boot(&[0x00E0, 0xF00A]);

    chip8.step().unwrap();
    assert!(chip8.display().iter().flatten().all(|p| !p));
    assert!(chip8.is_display_changed());

    assert_eq!(chip8.step().unwrap(), Chip8Result::WaitingForKey);
    assert_eq!(chip8.pc(), 0x202);

    chip8.set_key(u4::new(0x7), true);
    assert_eq!(chip8.step().unwrap(), Chip8Result::Continue);
    assert_eq!(chip8.v()[0], 0x7);
    assert_eq!(chip8.pc(), 0x204);
}

#[test]
fn image_size_limits() {
    let mut chip8 = Chip8::with_seed(0);

    chip8.load(&vec![0x11; 3584]).unwrap();
    assert_eq!(chip8.memory()[0xFFF], 0x11);

    let err = chip8.load(&vec![0x11; 3585]).unwrap_err();
    assert!(matches!(err, LoadError::ImageTooLarge { size: 3585, .. }));

    chip8.load(&[0x22; 16]).unwrap();
    assert!(chip8.memory()[0x210..].iter().all(|b| *b == 0));
    assert_eq!(MAX_ROM_SIZE, 3584);
}

#[test]
fn store_registers_moves_index() {
    // LD V0..V2, LD I 0x300, LD [I] V2
    let mut chip8 = boot(&[0x600A, 0x610B, 0x620C, 0xA300, 0xF255]);
    for _ in 0..5 {
        chip8.step().unwrap();
    }

    assert_eq!(&chip8.memory()[0x300..0x303], &[0x0A, 0x0B, 0x0C]);
    assert_eq!(chip8.i(), 0x303);
}

#[test]
fn draw_digit_and_erase_it() {
    // LD V0 7, LD F V0, LD V1 0, DRW V1 V1 5, DRW V1 V1 5
    let mut chip8 = boot(&[0x6007, 0xF029, 0x6100, 0xD115, 0xD115]);
    for _ in 0..4 {
        chip8.step().unwrap();
    }

    // Glyph 7: F0 10 20 40 40
    assert_eq!(chip8.v()[0xF], 0);
    assert!(chip8.pixel(0, 0) && chip8.pixel(0, 3));
    assert!(chip8.pixel(1, 3));
    assert!(chip8.pixel(2, 2));
    assert!(chip8.pixel(4, 1));
    let lit = chip8.display().iter().flatten().filter(|p| **p).count();
    assert_eq!(lit, 4 + 1 + 1 + 1 + 1);

    chip8.step().unwrap();
    assert_eq!(chip8.v()[0xF], 1);
    assert_eq!(
        chip8.display_snapshot(),
        [[false; DISPLAY_X]; DISPLAY_Y]
    );
}

#[test]
fn subroutine_counts_down_delay_timer() {
    // 200: LD V0 3
    // 202: LD DT V0
    // 204: CALL 20A
    // 206: JP 206
    // 20A: LD V1 DT
    // 20C: RET
    let mut chip8 = boot(&[0x6003, 0xF015, 0x220A, 0x1206, 0x0000, 0xF107, 0x00EE]);
    chip8.step().unwrap();
    chip8.step().unwrap();

    for _ in 0..10 {
        chip8.tick();
    }
    assert_eq!(chip8.delay_timer(), 0);

    chip8.step().unwrap();
    assert_eq!(chip8.stack(), &[0x206]);
    chip8.step().unwrap();
    chip8.step().unwrap();
    assert_eq!(chip8.v()[1], 0);
    assert_eq!(chip8.pc(), 0x206);
    assert!(chip8.stack().is_empty());
}
