mod frame_codec;
