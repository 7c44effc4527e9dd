//! FEN encoding and decoding for [`Position`].
//!
//! En passant and the move counters are not tracked: encoding always emits
//! `- 0 1`, and decoding validates those fields but discards them.

use crate::error::MalformedPositionError;
use crate::position::{CastlingRights, Color, Piece, Position, Square};

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

const FIELD_COUNT: usize = 6;

/// Encode a position as a full six-field FEN string.
pub fn encode(position: &Position) -> String {
    let mut fen = String::with_capacity(64);

    for (i, row) in position.rows().enumerate() {
        if i > 0 {
            fen.push('/');
        }
        let mut empty = 0u8;
        for cell in row {
            match cell {
                Some(piece) => {
                    if empty > 0 {
                        fen.push(char::from(b'0' + empty));
                        empty = 0;
                    }
                    fen.push(piece.to_char());
                }
                None => empty += 1,
            }
        }
        if empty > 0 {
            fen.push(char::from(b'0' + empty));
        }
    }

    fen.push(' ');
    fen.push(position.side_to_move().to_char());
    fen.push(' ');
    fen.push_str(&castling_field(position.castling()));
    fen.push_str(" - 0 1");
    fen
}

/// Decode six-field FEN text into a [`Position`].
pub fn decode(text: &str) -> Result<Position, MalformedPositionError> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields.len() != FIELD_COUNT {
        return Err(MalformedPositionError::FieldCount(fields.len()));
    }

    let squares = parse_placement(fields[0])?;
    let side = parse_side(fields[1])?;
    let castling = parse_castling(fields[2])?;
    parse_en_passant(fields[3])?;
    parse_counter(fields[4])?;
    parse_counter(fields[5])?;

    Ok(Position::from_parts(squares, side, castling))
}

/// Read only the side-to-move and castling fields of FEN text.
pub fn parse_castling_and_turn(
    text: &str,
) -> Result<(Color, CastlingRights), MalformedPositionError> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields.len() < 3 {
        return Err(MalformedPositionError::FieldCount(fields.len()));
    }
    Ok((parse_side(fields[1])?, parse_castling(fields[2])?))
}

/// Rewrite the side-to-move and castling fields of FEN text, leaving every
/// other field exactly as it was.
pub fn apply_castling_and_turn(
    text: &str,
    side: Color,
    rights: CastlingRights,
) -> Result<String, MalformedPositionError> {
    let mut fields: Vec<String> = text.split_whitespace().map(str::to_string).collect();
    if fields.len() < 3 {
        return Err(MalformedPositionError::FieldCount(fields.len()));
    }
    fields[1] = side.to_char().to_string();
    fields[2] = castling_field(rights);
    Ok(fields.join(" "))
}

fn castling_field(rights: CastlingRights) -> String {
    if rights.is_empty() {
        return "-".to_string();
    }
    let mut field = String::with_capacity(4);
    for (flag, letter) in [
        (rights.white_king_side, 'K'),
        (rights.white_queen_side, 'Q'),
        (rights.black_king_side, 'k'),
        (rights.black_queen_side, 'q'),
    ] {
        if flag {
            field.push(letter);
        }
    }
    field
}

fn parse_placement(placement: &str) -> Result<[Option<Piece>; 64], MalformedPositionError> {
    let ranks: Vec<&str> = placement.split('/').collect();
    if ranks.len() != 8 {
        return Err(MalformedPositionError::RankCount(ranks.len()));
    }

    let mut squares = [None; 64];
    for (i, rank_text) in ranks.iter().enumerate() {
        // FEN lists rank 8 first
        let rank = 7 - i as u8;
        let mut file = 0usize;
        for c in rank_text.chars() {
            match c {
                '1'..='8' => file += c as usize - '0' as usize,
                _ => {
                    let piece =
                        Piece::from_char(c).ok_or(MalformedPositionError::InvalidPiece(c))?;
                    if file < 8 {
                        squares[usize::from(rank) * 8 + file] = Some(piece);
                    }
                    file += 1;
                }
            }
        }
        if file != 8 {
            return Err(MalformedPositionError::RankWidth {
                rank: rank + 1,
                files: file,
            });
        }
    }
    Ok(squares)
}

fn parse_side(field: &str) -> Result<Color, MalformedPositionError> {
    let mut chars = field.chars();
    match (chars.next().and_then(Color::from_char), chars.next()) {
        (Some(color), None) => Ok(color),
        _ => Err(MalformedPositionError::SideToMove(field.to_string())),
    }
}

fn parse_castling(field: &str) -> Result<CastlingRights, MalformedPositionError> {
    let invalid = || MalformedPositionError::Castling(field.to_string());
    if field == "-" {
        return Ok(CastlingRights::NONE);
    }
    if field.is_empty() {
        return Err(invalid());
    }

    let mut rights = CastlingRights::NONE;
    for c in field.chars() {
        let flag = match c {
            'K' => &mut rights.white_king_side,
            'Q' => &mut rights.white_queen_side,
            'k' => &mut rights.black_king_side,
            'q' => &mut rights.black_queen_side,
            _ => return Err(invalid()),
        };
        if *flag {
            return Err(invalid());
        }
        *flag = true;
    }
    Ok(rights)
}

fn parse_en_passant(field: &str) -> Result<(), MalformedPositionError> {
    if field == "-" {
        return Ok(());
    }
    match field.parse::<Square>() {
        Ok(square) if square.rank() == 2 || square.rank() == 5 => Ok(()),
        _ => Err(MalformedPositionError::EnPassant(field.to_string())),
    }
}

fn parse_counter(field: &str) -> Result<u32, MalformedPositionError> {
    field
        .parse()
        .map_err(|_| MalformedPositionError::MoveCounter(field.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::PieceKind;

    #[test]
    fn test_decode_starting_position() {
        let pos = decode(STARTING_FEN).unwrap();
        assert_eq!(pos, Position::starting());
        assert_eq!(pos.side_to_move(), Color::White);
        assert_eq!(pos.castling(), CastlingRights::ALL);
        assert_eq!(encode(&pos), STARTING_FEN);
    }

    #[test]
    fn test_empty_board_is_structurally_valid() {
        let pos = decode("8/8/8/8/8/8/8/8 w - - 0 1").unwrap();
        assert_eq!(pos.piece_count(), 0);
        assert_eq!(pos.castling(), CastlingRights::NONE);
        assert_eq!(encode(&pos), "8/8/8/8/8/8/8/8 w - - 0 1");
    }

    #[test]
    fn test_round_trip_sample_positions() {
        let samples = [
            "r1bqkb1r/pppp1ppp/2n2n2/4p2Q/2B1P3/8/PPPP1PPP/RNB1K1NR w KQkq - 0 1",
            "8/5k2/8/3P4/8/8/2K5/8 b - - 0 1",
            "4k3/8/8/8/8/8/8/R3K2R w Kq - 0 1",
            "rnbqkbnr/pp1ppppp/8/2p5/4P3/8/PPPP1PPP/RNBQKBNR b Qk - 0 1",
        ];
        for fen in samples {
            let pos = decode(fen).unwrap();
            assert_eq!(encode(&pos), fen);
            assert_eq!(decode(&encode(&pos)).unwrap(), pos);
        }
    }

    #[test]
    fn test_round_trip_after_edits() {
        let mut pos = Position::empty();
        let pieces = [
            ("a1", 'R'),
            ("h8", 'k'),
            ("d4", 'Q'),
            ("e5", 'p'),
            ("b7", 'N'),
        ];
        for (square, letter) in pieces {
            pos = pos.with_piece(square.parse().unwrap(), Piece::from_char(letter));
        }
        let pos = pos
            .with_side_to_move(Color::Black)
            .with_castling(CastlingRights {
                white_queen_side: true,
                ..CastlingRights::NONE
            });
        assert_eq!(decode(&encode(&pos)).unwrap(), pos);
    }

    #[test]
    fn test_round_trip_every_piece_side_and_castling_subset() {
        for mask in 0u8..16 {
            let rights = CastlingRights {
                white_king_side: mask & 1 != 0,
                white_queen_side: mask & 2 != 0,
                black_king_side: mask & 4 != 0,
                black_queen_side: mask & 8 != 0,
            };
            for side in [Color::White, Color::Black] {
                let mut pos = Position::empty()
                    .with_side_to_move(side)
                    .with_castling(rights);
                for (i, letter) in "PNBRQKpnbrqk".chars().enumerate() {
                    let index = (i * 5 + usize::from(mask) * 3) % 64;
                    let square = Square::new((index % 8) as u8, (index / 8) as u8).unwrap();
                    pos = pos.with_piece(square, Piece::from_char(letter));
                }
                assert_eq!(pos.piece_count(), 12);

                let text = encode(&pos);
                assert_eq!(decode(&text).unwrap(), pos, "fen: {text}");
                assert_eq!(encode(&decode(&text).unwrap()), text);
            }
        }
    }

    #[test]
    fn test_castling_normalized_to_kqkq_order() {
        let pos = decode("r3k2r/8/8/8/8/8/8/R3K2R w qkQK - 0 1").unwrap();
        assert_eq!(encode(&pos), "r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1");
    }

    #[test]
    fn test_move_counters_and_en_passant_not_retained() {
        let pos = decode("rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq e6 0 2").unwrap();
        assert_eq!(
            encode(&pos),
            "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 1"
        );
    }

    #[test]
    fn test_decode_places_pieces_on_correct_squares() {
        let pos = decode("7k/8/8/8/8/8/8/K7 w - - 0 1").unwrap();
        let a1: Square = "a1".parse().unwrap();
        let h8: Square = "h8".parse().unwrap();
        assert_eq!(pos.piece_at(a1).unwrap().kind, PieceKind::King);
        assert_eq!(pos.piece_at(a1).unwrap().color, Color::White);
        assert_eq!(pos.piece_at(h8).unwrap().color, Color::Black);
    }

    #[test]
    fn test_rejects_missing_rank() {
        assert_eq!(
            decode("rnbqkbnr/pppppppp/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"),
            Err(MalformedPositionError::RankCount(7))
        );
    }

    #[test]
    fn test_rejects_invalid_piece_letter() {
        assert_eq!(
            decode("rnbqkbnr/pppppppp/8/8/4X3/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"),
            Err(MalformedPositionError::InvalidPiece('X'))
        );
        assert_eq!(
            decode("rnbqkbnr/pppppppp/8/8/9/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"),
            Err(MalformedPositionError::InvalidPiece('9'))
        );
        assert_eq!(
            decode("rnbqkbnr/pppppppp/8/8/08/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"),
            Err(MalformedPositionError::InvalidPiece('0'))
        );
    }

    #[test]
    fn test_rejects_wrong_rank_width() {
        assert_eq!(
            decode("rnbqkbnr/ppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"),
            Err(MalformedPositionError::RankWidth { rank: 7, files: 7 })
        );
        assert_eq!(
            decode("rnbqkbnr/pppppppp/8/8/44P/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"),
            Err(MalformedPositionError::RankWidth { rank: 4, files: 9 })
        );
    }

    #[test]
    fn test_rejects_wrong_field_count() {
        assert_eq!(
            decode("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq"),
            Err(MalformedPositionError::FieldCount(3))
        );
        assert_eq!(decode(""), Err(MalformedPositionError::FieldCount(0)));
    }

    #[test]
    fn test_rejects_bad_flag_fields() {
        assert!(matches!(
            decode("8/8/8/8/8/8/8/8 x - - 0 1"),
            Err(MalformedPositionError::SideToMove(_))
        ));
        assert!(matches!(
            decode("8/8/8/8/8/8/8/8 w KK - 0 1"),
            Err(MalformedPositionError::Castling(_))
        ));
        assert!(matches!(
            decode("8/8/8/8/8/8/8/8 w - e4 0 1"),
            Err(MalformedPositionError::EnPassant(_))
        ));
        assert!(matches!(
            decode("8/8/8/8/8/8/8/8 w - - x 1"),
            Err(MalformedPositionError::MoveCounter(_))
        ));
    }

    #[test]
    fn test_parse_castling_and_turn() {
        let (side, rights) =
            parse_castling_and_turn("r3k2r/8/8/8/8/8/8/R3K2R b Kq - 0 1").unwrap();
        assert_eq!(side, Color::Black);
        assert!(rights.white_king_side);
        assert!(!rights.white_queen_side);
        assert!(!rights.black_king_side);
        assert!(rights.black_queen_side);
    }

    #[test]
    fn test_apply_castling_and_turn_keeps_other_fields() {
        let fen = "r3k2r/8/8/8/8/8/8/R3K2R w KQkq e3 12 40";
        let rights = CastlingRights {
            black_king_side: true,
            ..CastlingRights::NONE
        };
        let updated = apply_castling_and_turn(fen, Color::Black, rights).unwrap();
        assert_eq!(updated, "r3k2r/8/8/8/8/8/8/R3K2R b k e3 12 40");

        let cleared = apply_castling_and_turn(fen, Color::White, CastlingRights::NONE).unwrap();
        assert_eq!(cleared, "r3k2r/8/8/8/8/8/8/R3K2R w - e3 12 40");
    }

    #[test]
    fn test_apply_castling_and_turn_is_idempotent() {
        let rights = CastlingRights {
            white_king_side: true,
            black_queen_side: true,
            ..CastlingRights::NONE
        };
        let once = apply_castling_and_turn(STARTING_FEN, Color::Black, rights).unwrap();
        let twice = apply_castling_and_turn(&once, Color::Black, rights).unwrap();
        assert_eq!(once, twice);
        assert_eq!(parse_castling_and_turn(&twice).unwrap(), (Color::Black, rights));
    }

    #[test]
    fn test_apply_castling_and_turn_needs_flag_fields() {
        assert_eq!(
            apply_castling_and_turn("8/8/8/8/8/8/8/8 w", Color::White, CastlingRights::ALL),
            Err(MalformedPositionError::FieldCount(2))
        );
    }
}
