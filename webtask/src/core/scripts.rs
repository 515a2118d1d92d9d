//! JavaScript snippets handed to the agent for audio tasks.
//!
//! Chrome is launched with fake media device flags, so `getUserMedia()`
//! works without a microphone. These snippets replace or tap that stream.
//! Each snippet is a single IIFE suitable for `Runtime.evaluate`.

/// Parameters for the synthetic tone injected by [`fake_audio_js`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneSpec {
    /// Tone frequency in Hz. `0.0` yields silence.
    pub frequency_hz: f64,
    /// How long the tone plays, in seconds.
    pub duration_secs: f64,
}

impl Default for ToneSpec {
    fn default() -> Self {
        Self {
            frequency_hz: 440.0,
            duration_secs: 10.0,
        }
    }
}

/// Override `getUserMedia` so audio requests receive an oscillator stream.
///
/// Must run before the page asks for microphone access.
pub fn fake_audio_js(tone: ToneSpec) -> String {
    let duration_ms = (tone.duration_secs.max(0.0) * 1000.0).round() as u64;
    let mut js = String::from(
        "(()=>{const ctx=new AudioContext();const osc=ctx.createOscillator();",
    );
    js.push_str(&format!(
        "osc.frequency.setValueAtTime({},ctx.currentTime);",
        tone.frequency_hz
    ));
    js.push_str("const dest=ctx.createMediaStreamDestination();osc.connect(dest);osc.start();");
    js.push_str(&format!("setTimeout(()=>osc.stop(),{duration_ms});"));
    js.push_str(
        "const orig=navigator.mediaDevices.getUserMedia.bind(navigator.mediaDevices);\
navigator.mediaDevices.getUserMedia=async(c)=>{\
if(c&&c.audio){const s=dest.stream;\
if(c.video){const v=await orig({video:c.video});\
v.getVideoTracks().forEach(t=>s.addTrack(t));return s;}\
return s;}return orig(c);};\
return 'Audio injection active';})()",
    );
    js
}

/// Tap every audio stream the page obtains and buffer its samples in
/// `window.__audioCapture`.
pub fn start_audio_capture_js() -> String {
    String::from(
        "(()=>{if(window.__audioCapture){return 'Audio capture already active';}\
const cap={chunks:[],sampleRate:44100,channels:1,nodes:[]};window.__audioCapture=cap;\
const orig=navigator.mediaDevices.getUserMedia.bind(navigator.mediaDevices);\
navigator.mediaDevices.getUserMedia=async(c)=>{const s=await orig(c);\
if(c&&c.audio){const ctx=new AudioContext();cap.sampleRate=ctx.sampleRate;\
const src=ctx.createMediaStreamSource(s);const proc=ctx.createScriptProcessor(4096,1,1);\
proc.onaudioprocess=(e)=>{cap.chunks.push(new Float32Array(e.inputBuffer.getChannelData(0)));};\
src.connect(proc);proc.connect(ctx.destination);cap.nodes.push(proc,src,ctx);}\
return s;};return 'Audio capture active';})()",
    )
}

/// Stop the capture started by [`start_audio_capture_js`] and return the
/// buffered samples as a base64 WAV (PCM16 little-endian, 44-byte header).
///
/// Evaluates to an empty string when nothing was captured.
pub fn collect_audio_js() -> String {
    String::from(
        "(()=>{const cap=window.__audioCapture;if(!cap||cap.chunks.length===0){return '';}\
cap.nodes.forEach(n=>{try{n.disconnect&&n.disconnect();}catch(_){}});\
const total=cap.chunks.reduce((n,c)=>n+c.length,0);\
const buf=new ArrayBuffer(44+total*2);const v=new DataView(buf);\
const w=(o,s)=>{for(let i=0;i<s.length;i++){v.setUint8(o+i,s.charCodeAt(i));}};\
const rate=cap.sampleRate;const ch=cap.channels;\
w(0,'RIFF');v.setUint32(4,36+total*2,true);w(8,'WAVE');w(12,'fmt ');\
v.setUint32(16,16,true);v.setUint16(20,1,true);v.setUint16(22,ch,true);\
v.setUint32(24,rate,true);v.setUint32(28,rate*ch*2,true);v.setUint16(32,ch*2,true);\
v.setUint16(34,16,true);w(36,'data');v.setUint32(40,total*2,true);\
let o=44;for(const c of cap.chunks){for(let i=0;i<c.length;i++){\
const x=Math.max(-1,Math.min(1,c[i]));v.setInt16(o,x<0?x*0x8000:x*0x7fff,true);o+=2;}}\
let bin='';const bytes=new Uint8Array(buf);for(let i=0;i<bytes.length;i++){bin+=String.fromCharCode(bytes[i]);}\
delete window.__audioCapture;return btoa(bin);})()",
    )
}
