use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Everything `encodeURI` escapes: all but alphanumerics, the reserved
/// set, the unreserved marks and `#`.
const URI: &AsciiSet = &NON_ALPHANUMERIC
	.remove(b';')
	.remove(b',')
	.remove(b'/')
	.remove(b'?')
	.remove(b':')
	.remove(b'@')
	.remove(b'&')
	.remove(b'=')
	.remove(b'+')
	.remove(b'$')
	.remove(b'-')
	.remove(b'_')
	.remove(b'.')
	.remove(b'!')
	.remove(b'~')
	.remove(b'*')
	.remove(b'\'')
	.remove(b'(')
	.remove(b')')
	.remove(b'#');

/// Encodes a whole URI for use as a link target, leaving its structure intact.
pub fn encode_uri(input: &str) -> String {
	utf8_percent_encode(input, URI).to_string()
}
