//! Property tests for S3G framing and command encoding

use printkit_communication::s3g::{crc8, encode_packet, packet_length, PacketDecoder, S3gCommand};
use printkit_communication::{checksum, encode_numbered};
use proptest::prelude::*;

fn feed(decoder: &mut PacketDecoder, bytes: &[u8]) -> Vec<Vec<u8>> {
    bytes
        .iter()
        .filter_map(|b| decoder.push(*b).ok().flatten())
        .collect()
}

fn queries() -> impl Strategy<Value = S3gCommand> {
    prop_oneof![
        any::<u16>().prop_map(|host_version| S3gCommand::GetVersion { host_version }),
        Just(S3gCommand::GetAvailableBufferSize),
        Just(S3gCommand::ClearBuffer),
        Just(S3gCommand::AbortImmediately),
        Just(S3gCommand::Pause),
        (any::<u8>(), any::<u8>()).prop_map(|(tool, code)| S3gCommand::ToolQuery { tool, code }),
        Just(S3gCommand::IsFinished),
        (any::<u16>(), any::<u8>())
            .prop_map(|(offset, length)| S3gCommand::ReadFromEeprom { offset, length }),
        Just(S3gCommand::GetExtendedPosition),
        (any::<bool>(), any::<bool>()).prop_map(|(halt_steppers, clear_queue)| {
            S3gCommand::ExtendedStop {
                halt_steppers,
                clear_queue,
            }
        }),
    ]
}

fn tools() -> impl Strategy<Value = S3gCommand> {
    prop_oneof![
        Just(S3gCommand::GetBuildStats),
        (any::<u8>(), any::<u32>(), any::<u16>()).prop_map(|(axes, feedrate, timeout_s)| {
            S3gCommand::FindAxesMinimums {
                axes,
                feedrate,
                timeout_s,
            }
        }),
        (any::<u8>(), any::<u32>(), any::<u16>()).prop_map(|(axes, feedrate, timeout_s)| {
            S3gCommand::FindAxesMaximums {
                axes,
                feedrate,
                timeout_s,
            }
        }),
        any::<u32>().prop_map(|millis| S3gCommand::Delay { millis }),
        any::<u8>().prop_map(S3gCommand::ChangeTool),
        (any::<u8>(), any::<u16>(), any::<u16>()).prop_map(|(tool, delay_ms, timeout_s)| {
            S3gCommand::WaitForToolReady {
                tool,
                delay_ms,
                timeout_s,
            }
        }),
        (any::<u8>(), any::<u16>(), any::<u16>()).prop_map(|(tool, delay_ms, timeout_s)| {
            S3gCommand::WaitForPlatformReady {
                tool,
                delay_ms,
                timeout_s,
            }
        }),
        (
            any::<u8>(),
            any::<u8>(),
            prop::collection::vec(any::<u8>(), 0..=28)
        )
            .prop_map(|(tool, action, payload)| S3gCommand::ToolAction {
                tool,
                action,
                payload,
            }),
        (0u8..0x20, any::<bool>()).prop_map(|(axes, enable)| S3gCommand::EnableAxes { axes, enable }),
        (0u8..2, any::<i16>()).prop_map(|(t, c)| S3gCommand::set_toolhead_temperature(t, c)),
    ]
}

fn motion() -> impl Strategy<Value = S3gCommand> {
    let steps = prop::array::uniform5(any::<i32>());
    prop_oneof![
        (steps.clone(), any::<u32>())
            .prop_map(|(steps, dda)| S3gCommand::QueueExtendedPoint { steps, dda }),
        steps
            .clone()
            .prop_map(|steps| S3gCommand::SetExtendedPosition { steps }),
        (steps.clone(), any::<u32>(), 0u8..0x20).prop_map(|(steps, duration_us, relative)| {
            S3gCommand::QueueExtendedPointNew {
                steps,
                duration_us,
                relative,
            }
        }),
        (
            steps,
            any::<u32>(),
            0u8..0x20,
            -1000.0f32..1000.0,
            any::<u16>()
        )
            .prop_map(|(steps, dda_rate, relative, distance_mm, feedrate)| {
                S3gCommand::QueueExtendedPointAccelerated {
                    steps,
                    dda_rate,
                    relative,
                    distance_mm,
                    feedrate,
                }
            }),
        any::<u8>().prop_map(|axes| S3gCommand::StoreHomePositions { axes }),
        any::<u8>().prop_map(|axes| S3gCommand::RecallHomePositions { axes }),
        any::<bool>().prop_map(S3gCommand::SetAccelerationToggle),
        prop::array::uniform20(any::<u8>()).prop_map(|raw| S3gCommand::StreamVersion { raw }),
    ]
}

fn interface() -> impl Strategy<Value = S3gCommand> {
    prop_oneof![
        (any::<u8>(), any::<u8>()).prop_map(|(axis, value)| S3gCommand::SetPotValue { axis, value }),
        (any::<u8>(), any::<u8>(), any::<u8>(), any::<u8>(), any::<u8>()).prop_map(
            |(red, green, blue, blink, effect)| S3gCommand::SetRgbLed {
                red,
                green,
                blue,
                blink,
                effect,
            }
        ),
        (any::<u16>(), any::<u16>(), any::<u8>()).prop_map(|(frequency, duration_ms, effect)| {
            S3gCommand::SetBeep {
                frequency,
                duration_ms,
                effect,
            }
        }),
        (any::<u8>(), any::<u16>(), any::<u8>()).prop_map(|(mask, timeout_s, options)| {
            S3gCommand::WaitForButton {
                mask,
                timeout_s,
                options,
            }
        }),
        (
            any::<u8>(),
            any::<u8>(),
            any::<u8>(),
            any::<u8>(),
            "[A-Za-z0-9 ]{0,26}"
        )
            .prop_map(|(options, x, y, timeout_s, text)| S3gCommand::DisplayMessage {
                options,
                x,
                y,
                timeout_s,
                text,
            }),
        any::<u8>().prop_map(S3gCommand::SetBuildPercent),
        any::<u8>().prop_map(S3gCommand::QueueSong),
        any::<u8>().prop_map(S3gCommand::ResetToFactory),
        (any::<u32>(), "[a-z0-9 ]{0,26}")
            .prop_map(|(steps, name)| S3gCommand::BuildStart { steps, name }),
        Just(S3gCommand::BuildEnd),
    ]
}

fn command() -> impl Strategy<Value = S3gCommand> {
    prop_oneof![queries(), tools(), motion(), interface()]
}

proptest! {
    #[test]
    fn framed_payloads_decode_unchanged(payload in prop::collection::vec(any::<u8>(), 1..=32)) {
        let packet = encode_packet(&payload).unwrap();
        let mut decoder = PacketDecoder::new();
        let decoded = feed(&mut decoder, &packet);
        prop_assert_eq!(decoded, vec![payload]);
    }

    #[test]
    fn single_bit_errors_are_detected(
        payload in prop::collection::vec(any::<u8>(), 1..=32),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let mut corrupted = payload.clone();
        let i = index.index(corrupted.len());
        corrupted[i] ^= 1 << bit;
        prop_assert_ne!(crc8(&payload), crc8(&corrupted));
    }

    #[test]
    fn encoded_commands_match_opcode_table(command in command()) {
        let payload = command.encode().unwrap();
        prop_assert_eq!(payload[0], command.opcode());
        prop_assert_eq!(packet_length(&payload).unwrap(), Some(payload.len()));
        prop_assert_eq!(S3gCommand::decode(&payload).unwrap(), command);
    }

    #[test]
    fn numbered_lines_carry_their_checksum(line in 0u32..100_000, text in "[GMT][0-9]{1,3}( [XYZEFS]-?[0-9]{1,4})*") {
        let encoded = encode_numbered(line, &text);
        let trimmed = encoded.trim_end();
        let (body, cs) = trimmed.rsplit_once('*').unwrap();
        prop_assert_eq!(body, format!("N{} {}", line, text));
        prop_assert_eq!(cs.parse::<u8>().unwrap(), checksum(body));
    }
}

#[test]
fn test_decoder_resynchronises_after_noise() {
    let mut bytes = vec![0x00, 0x42, 0xFF];
    bytes.extend(encode_packet(&[0x81, 1, 2]).unwrap());
    let mut decoder = PacketDecoder::new();
    assert_eq!(feed(&mut decoder, &bytes), vec![vec![0x81, 1, 2]]);
}

#[test]
fn test_bad_crc_is_reported_and_recovered() {
    let mut bad = encode_packet(&[0x81]).unwrap();
    *bad.last_mut().unwrap() ^= 0xFF;
    let mut decoder = PacketDecoder::new();
    let results: Vec<_> = bad.iter().map(|b| decoder.push(*b)).collect();
    assert!(results.last().unwrap().is_err());

    let good = encode_packet(&[0x81]).unwrap();
    assert_eq!(feed(&mut decoder, &good), vec![vec![0x81]]);
}

#[test]
fn test_long_build_name_is_truncated() {
    let name = "abcdefghijklmnopqrstuvwxyz0123456789ABCD".to_string();
    let command = S3gCommand::BuildStart { steps: 7, name };
    let payload = command.encode().unwrap();
    assert_eq!(payload.len(), 32);
    assert_eq!(
        S3gCommand::decode(&payload).unwrap(),
        S3gCommand::BuildStart {
            steps: 7,
            name: "abcdefghijklmnopqrstuvwxyz".to_string(),
        }
    );
}

#[test]
fn test_nul_in_message_is_dropped() {
    let command = S3gCommand::DisplayMessage {
        options: 0,
        x: 0,
        y: 1,
        timeout_s: 5,
        text: "Hot\0end".to_string(),
    };
    let payload = command.encode().unwrap();
    match S3gCommand::decode(&payload).unwrap() {
        S3gCommand::DisplayMessage { text, .. } => assert_eq!(text, "Hotend"),
        other => panic!("unexpected {:?}", other),
    }
}
