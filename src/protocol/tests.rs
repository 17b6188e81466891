//! Framing and payload tests

use super::payload::*;
use super::*;

fn started_packet() -> RemotePacket {
    DebuggeeMessage::Started(DebuggeeStarted {
        kernel_base_address: 0xFFFF_F800_0000_0000,
        os_name: "TestOS".to_string(),
    })
    .to_packet()
}

#[test]
fn test_checksum_wraps() {
    assert_eq!(compute_checksum(&[0xFF, 0x02]), 0x01);
    assert_eq!(compute_checksum(&[]), 0);
}

#[test]
fn test_encoded_packet_layout() {
    let buf = encode_raw(1, 0x0302, &[0xAA, 0xBB]);

    assert_eq!(buf[0], PACKET_INDICATOR);
    assert_eq!(buf[1], 1);
    assert_eq!(&buf[2..4], &[0x02, 0x03]);
    assert_eq!(&buf[4..6], &[0xAA, 0xBB]);
    assert_eq!(buf[6], 0x01u8.wrapping_add(0x02).wrapping_add(0x03).wrapping_add(0xAA).wrapping_add(0xBB));
    assert!(verify_packet(&buf));
}

#[test]
fn test_single_bit_flip_is_detected() {
    let buf = started_packet().encode();

    // every bit of every checksummed byte
    for byte in 1..buf.len() - 1 {
        for bit in 0..8 {
            let mut corrupted = buf.clone();
            corrupted[byte] ^= 1 << bit;
            assert!(!verify_packet(&corrupted), "flip at byte {} bit {}", byte, bit);
            assert!(matches!(
                classify(&corrupted, PacketType::DebuggeeToDebugger),
                Err(FrameError::ChecksumMismatch { .. })
            ));
        }
    }
}

#[test]
fn test_close_signals() {
    assert!(is_close_signal(&[]));
    assert!(is_close_signal(&[0]));
    assert!(!is_close_signal(&[1]));

    assert_eq!(classify(&[], PacketType::DebuggeeToDebugger), Ok(Received::Closed));
    assert_eq!(classify(&[0], PacketType::DebuggeeToDebugger), Ok(Received::Closed));
}

#[test]
fn test_classify_rejects_bad_indicator_before_checksum() {
    let mut buf = started_packet().encode();
    buf[0] = 0x7F;
    // checksum no longer matters once the indicator is wrong
    buf[5] ^= 0x10;

    assert_eq!(
        classify(&buf, PacketType::DebuggeeToDebugger),
        Err(FrameError::BadIndicator { found: 0x7F })
    );
}

#[test]
fn test_classify_rejects_wrong_role() {
    let buf = started_packet().encode();

    assert_eq!(
        classify(&buf, PacketType::DebuggerToDebuggeeExecuteOnUserMode),
        Err(FrameError::UnexpectedType {
            expected: PacketType::DebuggerToDebuggeeExecuteOnUserMode,
            found: 1,
        })
    );
}

#[test]
fn test_classify_short_buffer() {
    assert_eq!(
        classify(&[PACKET_INDICATOR, 1, 2], PacketType::DebuggeeToDebugger),
        Err(FrameError::TooShort { len: 3 })
    );
}

#[test]
fn test_unknown_action_survives_framing() {
    let buf = encode_raw(PacketType::DebuggeeToDebugger.code(), 0x0999, &[1, 2, 3]);

    let Ok(Received::Packet(packet)) = classify(&buf, PacketType::DebuggeeToDebugger) else {
        panic!("packet should pass framing");
    };
    assert_eq!(packet.action_code, 0x0999);
    assert_eq!(packet.action(), None);
    assert_eq!(packet.payload, vec![1, 2, 3]);
}

#[test]
fn test_started_packet_decodes() {
    let buf = started_packet().encode();
    let Ok(Received::Packet(packet)) = classify(&buf, PacketType::DebuggeeToDebugger) else {
        panic!("packet should pass framing");
    };

    let message = DebuggeeMessage::decode(RequestedAction::DebuggeeStarted, &packet.payload)
        .unwrap()
        .unwrap();
    match message {
        DebuggeeMessage::Started(started) => {
            assert_eq!(started.kernel_base_address, 0xFFFF_F800_0000_0000);
            assert_eq!(started.os_name, "TestOS");
        }
        other => panic!("unexpected message {:?}", other),
    }
}

#[test]
fn test_paused_packet_reason_and_stage() {
    let mut instruction_bytes = [0u8; MAXIMUM_INSTR_SIZE];
    instruction_bytes[0] = 0xCC;
    let paused = PausedPacket {
        rip: 0xFFFF_F800_1234_5678,
        is_processor_on_32bit_mode: false,
        ignore_disassembling: false,
        pausing_reason: PausingReason::EventTriggered.code(),
        current_core: 3,
        event_tag: 0x100_0002,
        event_calling_stage: CallingStage::PostEventEmulation.code(),
        rflags: 0x246,
        instruction_bytes,
        read_instruction_len: 1,
    };

    let decoded = PausedPacket::from_bytes(&paused.to_bytes()).unwrap();
    assert_eq!(decoded.reason(), Some(PausingReason::EventTriggered));
    assert_eq!(decoded.calling_stage(), Some(CallingStage::PostEventEmulation));
    assert_eq!(decoded.instruction_bytes[0], 0xCC);
    assert_eq!(decoded.current_core, 3);
}

#[test]
fn test_truncated_payload_is_an_error() {
    let err = DebuggeeMessage::decode(RequestedAction::DebuggeeResultOfChangingCore, &[1, 0, 0])
        .unwrap_err();

    assert_eq!(
        err,
        DecodeError::Truncated {
            offset: 0,
            needed: 4,
            available: 3
        }
    );
}

#[test]
fn test_requests_are_not_debuggee_messages() {
    assert_eq!(
        DebuggeeMessage::decode(RequestedAction::ModeContinue, &[]).unwrap(),
        None
    );
    assert!(!RequestedAction::ModeContinue.is_debuggee_to_debugger());
    assert!(RequestedAction::DebuggeeResultOfPcidevinfo.is_debuggee_to_debugger());
}

#[test]
fn test_pcitree_is_capped() {
    let mut writer = ByteWriter::new();
    writer.u32(KernelStatus::SUCCESS.0).u32(300);
    for i in 0..300u32 {
        writer.u8(i as u8).u8(0).u8(0).u16(0x8086).u16(0x1234);
    }

    let result = PcitreeResult::from_bytes(&writer.finish()).unwrap();
    assert_eq!(result.devices.len(), DEV_MAX_NUM);
}

#[test]
fn test_callstack_frame_limit() {
    let mut writer = ByteWriter::new();
    writer.u32(KernelStatus::SUCCESS.0).u32(0).bool(false).u32(u32::MAX);

    assert!(matches!(
        CallstackResult::from_bytes(&writer.finish()),
        Err(DecodeError::TooManyEntries { .. })
    ));
}

#[test]
fn test_fixed_str_stops_at_nul() {
    let mut writer = ByteWriter::new();
    writer.fixed_str::<16>("explorer.exe");
    let bytes = writer.finish();
    assert_eq!(bytes.len(), 16);

    let mut reader = ByteReader::new(&bytes);
    assert_eq!(reader.fixed_str::<16>().unwrap(), "explorer.exe");
}

#[test]
fn test_kernel_status_describe() {
    assert!(KernelStatus::SUCCESS.is_success());
    assert_eq!(
        KernelStatus::DEBUGGER_ALREADY_HIDE.describe(),
        "the debugger is already in transparent-mode (0xc000003e)"
    );
    assert_eq!(KernelStatus(0xC000_1234).describe(), "unknown error (0xc0001234)");
}

#[test]
fn test_every_message_round_trips_its_action() {
    let message = DebuggeeMessage::ReadMemory(vec![1, 2, 3, 4]);
    let packet = message.to_packet();

    assert_eq!(packet.action(), Some(RequestedAction::DebuggeeResultOfReadingMemory));
    let decoded = DebuggeeMessage::decode(packet.action().unwrap(), &packet.payload)
        .unwrap()
        .unwrap();
    assert_eq!(decoded, message);
}
